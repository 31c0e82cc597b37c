use clap::{Parser, ValueEnum};
use log::LevelFilter;

/// Log level options for command-line argument.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

/// Common command-line arguments for Lumen applications.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct EngineArgs {
    /// Set the log verbosity level
    #[arg(short = 'l', long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Number of frames to run before exiting
    #[arg(short = 'n', long = "frames", default_value_t = 8)]
    pub frames: u32,

    /// Number of frames the CPU may record ahead of the GPU
    #[arg(long = "frames-in-flight", default_value_t = 2)]
    pub frames_in_flight: u32,

    /// Additional positional arguments passed to the application
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

impl EngineArgs {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frame_options() {
        let args = EngineArgs::parse_from(["sandbox", "-l", "debug", "--frames", "3", "--frames-in-flight", "3"]);
        assert_eq!(args.log_level, LogLevel::Debug);
        assert_eq!(args.frames, 3);
        assert_eq!(args.frames_in_flight, 3);
        assert_eq!(LevelFilter::from(args.log_level), LevelFilter::Debug);
    }
}
