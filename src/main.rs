use log::{error, info};
use std::path::PathBuf;
use thermia_tibber::config::{self, Config};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        let value = match arg.to_str() {
            Some("--env-file") => args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            Some(s) if s.starts_with("--env-file=") => PathBuf::from(&s["--env-file=".len()..]),
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        };
        if env_file.replace(value).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }

    let (path, explicit) = match env_file {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            (path, true)
        }
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let default_path = cwd.join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };
    let applied = config::load_env_file(&path)?;
    Ok(Some(LoadedEnvFile { path, explicit, applied }))
}

fn init_logging(cfg: &Config) -> Result<(), String> {
    let default_filter = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(default_filter);
    builder.format_timestamp_secs();
    if let Some(level) = cfg.log_level {
        builder.filter_level(level);
    }
    if let Some(path) = cfg.log_file.as_ref() {
        let file = config::open_log_file(path).map_err(|e| format!("cannot open log file {}: {}", path.display(), e))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Config before logging: the log level and target are part of it.
    let cfg = match Config::from_env().and_then(|cfg| init_logging(&cfg).map(|_| cfg)) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "thermia-tibber {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = thermia_tibber::run(cfg) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
