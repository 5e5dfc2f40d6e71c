use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// Returns a random upper-case alphanumeric code of the given length.
pub fn random_code(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| (rng.sample(Alphanumeric) as char).to_ascii_uppercase())
        .take(length)
        .collect()
}
