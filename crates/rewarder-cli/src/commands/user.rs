use clap::Subcommand;
use rewarder_core::storage::RecordBackend;
use rewarder_core::{SqliteRecordBackend, UserRecord};
use uuid::Uuid;

#[derive(Subcommand)]
pub enum UserAction {
    /// List stored users, most playtime first
    List {
        /// Only show the first N users
        #[arg(long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one user's record and goal cursors as JSON
    Show {
        /// User id or last known name
        user: String,
    },
}

fn find(db: &SqliteRecordBackend, user: &str) -> Result<Option<UserRecord>, Box<dyn std::error::Error>> {
    let record = match Uuid::parse_str(user) {
        Ok(id) => db.load(id)?,
        Err(_) => db.find_by_username(user)?,
    };
    Ok(record)
}

pub fn run(action: UserAction) -> Result<(), Box<dyn std::error::Error>> {
    let db = SqliteRecordBackend::open()?;

    match action {
        UserAction::List { limit, json } => {
            let mut records = db.list()?;
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("no stored users");
            } else {
                for record in &records {
                    println!(
                        "{:<16} {:>8} min  {}",
                        record.username,
                        record.minutes_played(),
                        record.id
                    );
                }
            }
        }
        UserAction::Show { user } => match find(&db, &user)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => {
                eprintln!("unknown user: {user}");
                std::process::exit(1);
            }
        },
    }
    Ok(())
}
