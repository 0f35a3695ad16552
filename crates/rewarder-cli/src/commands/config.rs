use clap::Subcommand;
use rewarder_core::Config;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "playtime-ignore-afk", "modules.global-playtime-goals.enabled")
        key: String,
    },
    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Reset config to defaults
    Reset,
    /// Print the config file location
    Path,
    /// Show the goals each enabled module would pay out
    Goals,
}

pub fn run(action: ConfigAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("unknown key: {key}");
                    std::process::exit(1);
                }
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            println!("ok");
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let json = serde_json::to_string_pretty(&config)?;
            println!("{json}");
        }
        ConfigAction::Reset => {
            let config = Config::default();
            config.save()?;
            println!("config reset to defaults");
        }
        ConfigAction::Path => {
            println!("{}", Config::path()?.display());
        }
        ConfigAction::Goals => {
            let scopes = Config::load()?.goal_scopes();
            if scopes.is_empty() {
                println!("no goal modules enabled");
            }
            for module in scopes.iter() {
                println!("{} (every {} min)", module.scope(), module.refresh_time());
                for threshold in module.registry().thresholds() {
                    let rewards = module.registry().get(threshold).map_or(0, |g| g.rewards.len());
                    println!("  {threshold:>6} min  {rewards} reward(s)");
                }
            }
        }
    }
    Ok(())
}
