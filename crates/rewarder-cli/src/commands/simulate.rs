//! Scripted players driven through a real rewarder, as fast as possible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Args;
use rewarder_core::tracker::TICKS_PER_MINUTE;
use rewarder_core::{
    Config, Event, FixedClock, GoalScope, Location, LoggingSink, MemoryRecordBackend,
    OnlinePlayer, RecordBackend, RecordingSink, RewardSink, Rewarder, SqliteRecordBackend,
};
use uuid::Uuid;

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of scripted players
    #[arg(long, default_value = "1")]
    players: u32,
    /// Minutes each player keeps moving per day
    #[arg(long, default_value = "60")]
    minutes: u32,
    /// Minutes each player stands still after moving
    #[arg(long, default_value = "0")]
    idle: u32,
    /// Days to play, moving the clock forward between them
    #[arg(long, default_value = "1")]
    days: u32,
    /// Keep records in the user database instead of memory
    #[arg(long)]
    persist: bool,
    /// Print every event as one JSON line
    #[arg(long)]
    json: bool,
    /// Log rewards as they are paid instead of listing them at the end
    #[arg(long)]
    log_rewards: bool,
}

struct ScriptedPlayer {
    id: Uuid,
    name: String,
    x: AtomicI32,
    online: AtomicBool,
}

impl ScriptedPlayer {
    fn new(n: u32) -> Self {
        Self {
            id: Uuid::from_u128(u128::from(n)),
            name: format!("player{n}"),
            x: AtomicI32::new(0),
            online: AtomicBool::new(true),
        }
    }

    fn step(&self) {
        self.x.fetch_add(1, Ordering::Relaxed);
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

impl OnlinePlayer for ScriptedPlayer {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn location(&self) -> Location {
        Location::new("world", self.x.load(Ordering::Relaxed), 64, 0)
    }
}

struct Printer {
    json: bool,
    names: HashMap<Uuid, String>,
    /// Global minutes each user had when their last session ended.
    totals: HashMap<Uuid, u32>,
}

impl Printer {
    fn print(&mut self, events: Vec<Event>) -> Result<(), Box<dyn std::error::Error>> {
        for event in events {
            if let Event::SessionEnded {
                user,
                global_minutes,
                ..
            } = event
            {
                self.totals.insert(user, global_minutes);
            }
            if self.json {
                println!("{}", serde_json::to_string(&event)?);
            } else if let Some(line) = self.describe(&event) {
                println!("{line}");
            }
        }
        Ok(())
    }

    fn describe(&self, event: &Event) -> Option<String> {
        let name = event
            .user()
            .and_then(|id| self.names.get(&id))
            .map_or("?", String::as_str);
        let line = match event {
            Event::SessionStarted { global_minutes, .. } => {
                format!("{name} joined with {global_minutes} min played")
            }
            Event::SessionEnded {
                session_minutes,
                global_minutes,
                ..
            } => format!("{name} left after {session_minutes} min ({global_minutes} min total)"),
            Event::AfkStarted { .. } => format!("{name} is afk"),
            Event::AfkEnded { .. } => format!("{name} is back"),
            Event::GoalReached {
                scope, threshold, ..
            } => format!("{name} reached {threshold} min in {scope}"),
            Event::UnloadVetoed { .. } => format!("{name} stays resident"),
            _ => return None,
        };
        Some(line)
    }
}

pub fn run(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(simulate(args))
}

async fn simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let backend: Arc<dyn RecordBackend> = if args.persist {
        Arc::new(SqliteRecordBackend::open()?)
    } else {
        Arc::new(MemoryRecordBackend::new())
    };
    let recording = Arc::new(RecordingSink::new());
    let sink: Arc<dyn RewardSink> = if args.log_rewards {
        Arc::new(LoggingSink)
    } else {
        recording.clone()
    };
    let clock = Arc::new(FixedClock::new(Local::now().date_naive()));
    let rewarder = Rewarder::start(&config, backend, sink, clock.clone())?;

    let players: Vec<Arc<ScriptedPlayer>> =
        (1..=args.players).map(|n| Arc::new(ScriptedPlayer::new(n))).collect();
    let mut printer = Printer {
        json: args.json,
        names: players.iter().map(|p| (p.id, p.name.clone())).collect(),
        totals: HashMap::new(),
    };

    for day in 0..args.days {
        if day > 0 {
            clock.advance_days(1);
        }
        for player in &players {
            player.set_online(true);
            rewarder.start_session(player.clone());
        }
        printer.print(wait_attached(&rewarder).await)?;

        for _ in 0..args.minutes.saturating_mul(TICKS_PER_MINUTE) {
            for player in &players {
                player.step();
            }
            printer.print(rewarder.tick())?;
        }
        for _ in 0..args.idle.saturating_mul(TICKS_PER_MINUTE) {
            printer.print(rewarder.tick())?;
        }

        for player in &players {
            player.set_online(false);
        }
        printer.print(rewarder.tick())?;
        rewarder.store().flush().await;
    }
    printer.print(rewarder.shutdown().await)?;

    if !args.json {
        for delivery in recording.take() {
            println!("reward for {}: {}", delivery.recipient.name, delivery.rendered);
        }
        let scopes = rewarder.scopes();
        if let Some(global) = scopes.get(GoalScope::Global) {
            for player in &players {
                let total = printer.totals.get(&player.id).copied().unwrap_or(0);
                match global.registry().next_threshold(total) {
                    Some(next) => println!("{}: next global goal at {next} min", player.name),
                    None => println!("{}: every global goal reached", player.name),
                }
            }
        }
    }
    Ok(())
}

async fn wait_attached(rewarder: &Rewarder) -> Vec<Event> {
    let mut events = Vec::new();
    for _ in 0..5_000 {
        events.extend(rewarder.tick());
        if rewarder.sessions().iter().all(|s| !s.loading) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    events
}
