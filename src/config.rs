//! Environment-driven configuration, using a `lazy_static!`-backed global
//! config rather than threading a config struct through every constructor
//! call site.

use crate::log::LogLevel;

pub const SV_DEFAULT_PORT: u16 = 3636;
pub const DEFAULT_PID_PATH: &str = "/tmp";

lazy_static! {
    static ref ARGS: Args = Args::from_env();
}

#[derive(Clone)]
pub struct Args {
    /// Port forming `preloader_<port>.{sock,pid}`; not an actual network
    /// port, just a namespacing suffix shared with the client CLI.
    pub port: u16,
    /// Directory holding the pid file and control socket.
    pub pid_path: String,
    pub log_lvl: LogLevel,
    pub log_file: Option<String>,
    pub daemonize: bool,
    /// Newline-separated file of shared object paths to `dlopen` at init.
    pub load_file: Option<String>,
}

impl Args {
    pub fn get() -> &'static Args {
        &*ARGS
    }

    fn from_env() -> Args {
        let port = match std::env::var("PRELOADER_PORT") {
            Ok(v) => match v.parse::<u16>() {
                Ok(p) => p,
                Err(_) => crate::die!("Invalid port ({})", v),
            },
            Err(_) => SV_DEFAULT_PORT,
        };

        let log_lvl = match std::env::var("PRELOADER_LOG_LVL") {
            Ok(v) => match LogLevel::from_env_value(&v) {
                Some(l) => l,
                None => crate::die!(
                    "Unrecognized log_lvl ({}), supported ones are: \n  info, err, crit and all!",
                    v
                ),
            },
            Err(_) => LogLevel::LogInfo,
        };

        let log_file = std::env::var("PRELOADER_LOG_FILE").ok();
        // Presence-only, matching `if (getenv("PRELOADER_DAEMONIZE"))` in
        // the original: the variable's value is never inspected, so
        // `PRELOADER_DAEMONIZE=0` still daemonizes.
        let daemonize = std::env::var("PRELOADER_DAEMONIZE").is_ok();
        let load_file = std::env::var("PRELOADER_LOAD_FILE").ok();

        Args {
            port,
            pid_path: DEFAULT_PID_PATH.to_string(),
            log_lvl,
            log_file,
            daemonize,
            load_file,
        }
    }

    pub fn socket_path(&self) -> String {
        format!("{}/preloader_{}.sock", self.pid_path, self.port)
    }

    pub fn pid_file_path(&self) -> String {
        format!("{}/preloader_{}.pid", self.pid_path, self.port)
    }
}
