//! Path operations on a JSON tree, where empty objects count as absent.

use serde_json::{Map, Value};

/// Returns the value at the path, if present.
pub fn get<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;

    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }

    match node {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        value => Some(value),
    }
}

/// Sets the value at the path, replacing anything in the way.
/// Setting null or an empty object removes the path instead.
pub fn set(root: &mut Value, segments: &[String], value: Value) {
    if is_absent(&value) {
        remove(root, segments);
        return;
    }

    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;

    for segment in parents {
        node = object_mut(node)
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    object_mut(node).insert(last.clone(), value);
}

/// Removes the value at the path, pruning parents that end up empty.
pub fn remove(root: &mut Value, segments: &[String]) {
    if segments.is_empty() {
        *root = Value::Object(Map::new());
        return;
    }

    remove_below(root, segments);
}

/// Returns true if the node is empty after the removal.
fn remove_below(node: &mut Value, segments: &[String]) -> bool {
    let Some(map) = node.as_object_mut() else {
        return false;
    };

    match segments {
        [] => {}
        [last] => {
            map.remove(last);
        }
        [first, rest @ ..] => {
            let child_is_empty = map
                .get_mut(first)
                .map(|child| remove_below(child, rest))
                .unwrap_or(false);

            if child_is_empty {
                map.remove(first);
            }
        }
    }

    map.is_empty()
}

fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }

    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn path(path: &str) -> Vec<String> {
        path.split('/').map(str::to_string).collect()
    }

    #[test]
    fn test_set_and_get() {
        let mut root = json!({});

        set(&mut root, &path("session/A/members/bob"), json!({ "role": "host" }));
        set(&mut root, &path("session/A/playback"), json!({ "isPlaying": true }));

        assert_eq!(
            get(&root, &path("session/A/members/bob/role")),
            Some(&json!("host"))
        );
        assert_eq!(
            get(&root, &path("session/A/members")),
            Some(&json!({ "bob": { "role": "host" } }))
        );
        assert_eq!(get(&root, &path("session/B")), None);
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let mut root = json!({});

        set(&mut root, &path("session/A/members/bob"), json!({ "role": "host" }));
        remove(&mut root, &path("session/A/members/bob"));

        assert_eq!(get(&root, &path("session/A")), None);
        assert_eq!(root, json!({}), "nothing is left behind");
    }

    #[test]
    fn test_null_and_empty_objects_are_absent() {
        let mut root = json!({});

        set(&mut root, &path("a/b"), json!(1));
        set(&mut root, &path("a/c"), json!(2));
        set(&mut root, &path("a/b"), Value::Null);
        set(&mut root, &path("a/c"), json!({}));

        assert_eq!(get(&root, &path("a")), None);
    }

    #[test]
    fn test_set_replaces_scalars_in_the_way() {
        let mut root = json!({ "a": 5 });

        set(&mut root, &path("a/b"), json!(true));

        assert_eq!(get(&root, &path("a")), Some(&json!({ "b": true })));
    }
}
