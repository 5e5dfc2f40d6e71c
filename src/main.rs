use std::{env, sync::Arc, thread, time::Duration};

use colored::Colorize;
use log::{debug, error, info, warn};
use tandem_collab::{Collab, CollabError, CollabEvent, CollabEvents, Session};
use tandem_core::{Config, MediaRef, Player, StorePath, SyncEvent, Visibility};
use tandem_impls::{
    MemoryStore, MemoryStoreClient, SimulatedPlayer, SimulatedPlayerConfig, StoreConfig,
};
use thiserror::Error;
use tokio::{
    runtime::{self, Runtime},
    time::sleep,
};

mod logging;

const DEFAULT_MEDIA: &str = "https://youtu.be/dQw4w9WgXcQ";

/// Runs a host and two followers against an in-process store, end to end.
struct Demo {
    config: Config,
    store: MemoryStore,
    runtime: Runtime,
}

/// One participant of the demo, with its own connection and player.
struct Participant {
    name: &'static str,
    collab: Collab<MemoryStoreClient>,
    player: Arc<SimulatedPlayer>,
}

type DemoSession = Session<MemoryStoreClient, SimulatedPlayer>;

#[derive(Debug, Error)]
enum DemoError {
    #[error("Could not build the async runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Could not initialize logging: {0}")]
    Logging(#[from] log::SetLoggerError),

    #[error("{0}")]
    Collab(#[from] CollabError),

    #[error("{0:?} is not a recognizable media link or id")]
    InvalidMedia(String),

    #[error("Session {0} was not removed after everyone left")]
    NotReclaimed(String),
}

impl Demo {
    fn new() -> Result<Self, DemoError> {
        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("tandem-async")
            .build()?;

        let config = Config::from_env();
        let store = MemoryStore::new(StoreConfig::default());

        Ok(Self {
            config,
            store,
            runtime,
        })
    }

    fn run(&self) -> Result<(), DemoError> {
        self.runtime.block_on(self.scenario())
    }

    fn participant(&self, name: &'static str) -> Participant {
        let connection = Arc::new(self.store.connect());
        let collab = Collab::new(self.config.clone(), connection);

        let player = SimulatedPlayer::new(SimulatedPlayerConfig {
            initial_volume: self.config.default_volume,
            ..Default::default()
        });

        log_events(name, collab.events());

        Participant {
            name,
            collab,
            player: Arc::new(player),
        }
    }

    async fn scenario(&self) -> Result<(), DemoError> {
        let raw_media = env::var("TANDEM_DEMO_MEDIA").unwrap_or_else(|_| DEFAULT_MEDIA.to_string());
        let media = MediaRef::parse(&raw_media).ok_or(DemoError::InvalidMedia(raw_media))?;

        let host = self.participant("H");
        let f1 = self.participant("F1");
        let f2 = self.participant("F2");

        let h = host
            .collab
            .create_session(host.name, host.player.clone())
            .await?;

        let code = h.code().clone();
        info!("Created session {}", code.as_str().bold());

        // Codes are shared by word of mouth, so the case doesn't matter
        let typed = code.as_str().to_lowercase();
        let s1 = f1.collab.join_session(&typed, f1.name, f1.player.clone()).await?;
        let s2 = f2.collab.join_session(&typed, f2.name, f2.player.clone()).await?;

        h.load_media(media, "Demo song").await?;
        sleep(Duration::from_secs(1)).await;

        h.play()?;
        sleep(Duration::from_secs(3)).await;
        report(&[(&host, &h), (&f1, &s1), (&f2, &s2)]);

        h.seek(60.)?;
        h.set_volume(80)?;
        sleep(Duration::from_secs(1)).await;
        report(&[(&host, &h), (&f1, &s1), (&f2, &s2)]);

        info!("Backgrounding {} and interrupting its player", f1.name);
        s1.set_visibility(Visibility::Background);
        f1.player.interrupt();
        sleep(Duration::from_secs(1)).await;

        h.pause()?;
        sleep(Duration::from_secs(1)).await;
        report(&[(&host, &h), (&f1, &s1), (&f2, &s2)]);

        for session in [s1, s2, h] {
            if let Err(error) = session.leave().await {
                warn!("Leave task failed: {}", error);
            }
        }

        sleep(self.config.reclamation_grace() + Duration::from_millis(500)).await;

        if self.store.value_at(&StorePath::session(&code)).is_some() {
            return Err(DemoError::NotReclaimed(code.to_string()));
        }

        info!("Session {} was removed once everyone left", code);
        Ok(())
    }
}

impl DemoError {
    fn hint(&self) -> String {
        match self {
            DemoError::Runtime(_) => "The operating system refused to start the runtime threads. Check resource limits, then try again.".to_string(),
            DemoError::Logging(_) => "Another logger was already installed. This should not happen.".to_string(),
            DemoError::Collab(CollabError::InvalidCode(_)) => "Check TANDEM_CODE_LENGTH, codes of that length may not be valid.".to_string(),
            DemoError::Collab(_) => "This is a session error. Check the messages above for what the store reported.".to_string(),
            DemoError::InvalidMedia(_) => "Set TANDEM_DEMO_MEDIA to a YouTube link or an 11 character video id.".to_string(),
            DemoError::NotReclaimed(_) => "Check TANDEM_RECLAMATION_GRACE, the demo waits just past it.".to_string(),
        }
    }
}

fn report(participants: &[(&Participant, &DemoSession)]) {
    for (participant, session) in participants {
        let playback = participant.player.playback();

        info!(
            "{:>3} {:?} {} at {:.1}s, volume {}, {:?}",
            participant.name,
            session.role(),
            if playback.is_playing { "playing" } else { "paused" },
            playback.position,
            playback.volume,
            session.sync_status()
        );
    }
}

fn log_events(name: &'static str, events: CollabEvents) {
    thread::spawn(move || {
        while let Some(event) = events.recv() {
            match event {
                CollabEvent::Sync(SyncEvent::PositionUpdate { .. }) => {}
                CollabEvent::Sync(SyncEvent::SnapshotApplied { commands, .. }) => {
                    debug!("{} applied {:?}", name, commands)
                }
                CollabEvent::Sync(SyncEvent::MediaUnavailable {
                    media_ref, error, ..
                }) => warn!("{} can't play {}: {:?}", name, media_ref, error),
                CollabEvent::Sync(SyncEvent::SyncStatusUpdate { new_status, .. }) => {
                    info!("{} is now {:?}", name, new_status)
                }
                CollabEvent::ParticipantJoined { participant, .. } => {
                    info!("{} sees {} join", name, participant.display_name)
                }
                CollabEvent::ParticipantLeft { display_name, .. } => {
                    info!("{} sees {} leave", name, display_name)
                }
                other => debug!("{} got {:?}", name, other),
            }
        }
    });
}

fn main() {
    if let Err(error) = logging::init_logger() {
        eprintln!("{}", DemoError::from(error));
        return;
    }

    let result = Demo::new().and_then(|demo| {
        info!("Initialized successfully.");
        demo.run()
    });

    if let Err(error) = result {
        error!(
            "{} Read the error below to troubleshoot the issue.",
            "The demo failed!".bold().red()
        );
        error!("{}", error);
        error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
    }
}
