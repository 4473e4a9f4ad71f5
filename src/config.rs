//! Configuration.
//!
//! This module primarily contains the type [`Config`] that holds all the
//! configuration used by the server. It can be loaded both from a TOML
//! formatted config file and command line options.

use std::{env, fmt, fs};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use clap::{Command, Args, ArgAction, ArgMatches, FromArgMatches, Parser};
use dirs::home_dir;
use log::{LevelFilter, error};
#[cfg(unix)] use syslog::Facility;
use crate::error::Failed;
use crate::http::{ListenOptions, ServerOptions};
use crate::ssi::HandlerKind;


//------------ Defaults for Some Values --------------------------------------

/// The default port to listen on.
pub const DEFAULT_PORT: u16 = 4000;

/// The default host to listen on.
const DEFAULT_HOST: &str = "localhost";

/// Are directories without index documents listed by default?
const DEFAULT_DIRECTORY_LIST: bool = true;

/// The extensions tried for path segments by default.
const DEFAULT_EXTENSIONS: &[&str] = &["html", "shtml"];

/// The name of the config file looked for in the home directory.
const HOME_CONFIG_FILE: &str = ".fs-serve.conf";

/// The default syslog facility.
#[cfg(unix)]
const DEFAULT_SYSLOG_FACILITY: Facility = Facility::LOG_DAEMON;


//------------ Config --------------------------------------------------------

/// The server configuration.
///
/// All values are public and can be accessed directly.
///
/// The function [`config_args`][Self::config_args] adds all command line
/// arguments to a clap command. Its matches can then be used to create the
/// config via [`from_arg_matches`][Self::from_arg_matches].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The directory to serve files from.
    pub root: PathBuf,

    /// The port to listen on.
    ///
    /// If this is `None`, the default port is used and the server falls back
    /// to any free port if the default is taken.
    pub port: Option<u16>,

    /// The host name or address to listen on.
    pub host: String,

    /// Are directories without an index document listed?
    pub directory_list: bool,

    /// The value of the max-age directive in responses.
    pub max_age: u64,

    /// The extensions tried for path segments that don’t exist verbatim.
    pub extensions: Vec<String>,

    /// The SSI handlers to use for each file extension.
    pub ssi: HashMap<String, Vec<HandlerKind>>,

    /// The maximum number of nested includes.
    pub ssi_max_depth: usize,

    /// The timeout for fetching includes from URLs.
    pub include_timeout: Option<Duration>,

    /// The path to the TLS private key.
    pub tls_key: Option<PathBuf>,

    /// The path to the TLS certificate chain.
    pub tls_cert: Option<PathBuf>,

    /// The log levels to be logged.
    pub log_level: LevelFilter,

    /// The target to log to.
    pub log_target: LogTarget,
}

impl Config {
    /// Adds the command line arguments to a clap command.
    ///
    /// The function follows clap’s builder pattern: it takes a command,
    /// adds a bunch of arguments to it and returns it at the end.
    pub fn config_args(app: Command) -> Command {
        ConfigArgs::augment_args(app)
    }

    /// Creates a configuration from command line matches.
    ///
    /// The function attempts to create configuration from the command line
    /// arguments provided via `matches`. It will try to read a config file
    /// if provided via the config file option (`-c` or `--config`) or a
    /// file in `$HOME/.fs-serve.conf` otherwise. If the latter doesn’t
    /// exist either, starts with a default configuration.
    ///
    /// All relative paths given in command line arguments will be interpreted
    /// relative to `cur_dir`. Conversely, paths in the config file are
    /// treated as relative to the config file’s directory.
    pub fn from_arg_matches(
        matches: &ArgMatches,
        cur_dir: &Path,
    ) -> Result<Self, Failed> {
        let args = match ConfigArgs::from_arg_matches(matches) {
            Ok(args) => args,
            Err(err) => {
                error!("Failed to process command line arguments: {}", err);
                return Err(Failed)
            }
        };
        let mut res = Self::create_base_config(
            args.config.as_ref().map(|path| cur_dir.join(path)).as_deref()
        )?;
        res.apply_args(args, cur_dir)?;
        Ok(res)
    }

    /// Applies the command line arguments to a configuration.
    ///
    /// The path arguments will be interpreted relative to `cur_dir`.
    fn apply_args(
        &mut self,
        args: ConfigArgs,
        cur_dir: &Path,
    ) -> Result<(), Failed> {
        // log_target - Goes first so we can move things out of args later.
        self.apply_log_args(&args, cur_dir)?;

        // root
        if let Some(dir) = args.directory {
            self.root = cur_dir.join(dir)
        }
        else if self.root == Path::new("") {
            self.root = cur_dir.into()
        }

        // port
        if let Some(port) = args.port {
            self.port = Some(port)
        }

        // host
        if let Some(host) = args.host {
            self.host = host
        }

        // directory_list
        if args.no_directory_list {
            self.directory_list = false
        }

        // max_age
        if let Some(value) = args.max_age {
            self.max_age = value
        }

        // extensions
        if let Some(list) = args.extensions {
            self.extensions = list.into_iter().map(|ext| {
                ext.trim_start_matches('.').into()
            }).collect()
        }

        // ssi
        if let Some(list) = args.ssi {
            for ext in list {
                self.ssi.insert(
                    ext.trim_start_matches('.').into(),
                    HandlerKind::DEFAULT_CHAIN.into()
                );
            }
        }

        // ssi_max_depth
        if let Some(value) = args.ssi_max_depth {
            self.ssi_max_depth = value
        }

        // include_timeout
        if let Some(value) = args.include_timeout {
            self.include_timeout = Some(Duration::from_secs(value))
        }

        // tls_key
        if let Some(path) = args.tls_key {
            self.tls_key = Some(cur_dir.join(path))
        }

        // tls_cert
        if let Some(path) = args.tls_cert {
            self.tls_cert = Some(cur_dir.join(path))
        }

        // log_level
        if args.verbose > 1 {
            self.log_level = LevelFilter::Debug
        }
        else if args.verbose == 1 {
            self.log_level = LevelFilter::Info
        }
        else if args.quiet > 1 {
            self.log_level = LevelFilter::Off
        }
        else if args.quiet == 1 {
            self.log_level = LevelFilter::Error
        }

        Ok(())
    }

    /// Applies the logging-specific command line arguments to the config.
    ///
    /// This is the Unix version that also considers syslog as a valid
    /// target.
    #[cfg(unix)]
    fn apply_log_args(
        &mut self,
        args: &ConfigArgs,
        cur_dir: &Path,
    ) -> Result<(), Failed> {
        if args.syslog {
            if let Some(facility) = args.syslog_facility.as_ref() {
                self.log_target = LogTarget::Syslog(
                    match Facility::from_str(facility) {
                        Ok(value) => value,
                        Err(_) => {
                            error!("Invalid value for syslog-facility.");
                            return Err(Failed);
                        }
                    }
                )
            }
            else if !matches!(self.log_target, LogTarget::Syslog(_)) {
                // If we don’t have a syslog facility already from the config
                // file, we use the default.
                self.log_target = LogTarget::Syslog(DEFAULT_SYSLOG_FACILITY)
            }
        }
        else if let Some(file) = args.logfile.as_ref() {
            if file == "-" {
                self.log_target = LogTarget::Stderr
            }
            else {
                self.log_target = LogTarget::File(cur_dir.join(file))
            }
        }
        Ok(())
    }

    /// Applies the logging-specific command line arguments to the config.
    ///
    /// This is the non-Unix version that does not use syslog.
    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn apply_log_args(
        &mut self,
        args: &ConfigArgs,
        cur_dir: &Path,
    ) -> Result<(), Failed> {
        if let Some(file) = args.logfile.as_ref() {
            if file == "-" {
                self.log_target = LogTarget::Stderr
            }
            else {
                self.log_target = LogTarget::File(cur_dir.join(file))
            }
        }
        Ok(())
    }

    /// Creates the correct base configuration for the given config file path.
    ///
    /// If no config path is given, tries to read the default config in
    /// `$HOME/.fs-serve.conf`. If that doesn’t exist, creates a default
    /// config.
    fn create_base_config(path: Option<&Path>) -> Result<Self, Failed> {
        let file = match path {
            Some(path) => {
                match ConfigFile::read(path)? {
                    Some(file) => file,
                    None => {
                        error!("Cannot read config file {}", path.display());
                        return Err(Failed);
                    }
                }
            }
            None => {
                match home_dir() {
                    Some(dir) => match ConfigFile::read(
                                            &dir.join(HOME_CONFIG_FILE))? {
                        Some(file) => file,
                        None => return Ok(Self::default()),
                    }
                    None => return Ok(Self::default())
                }
            }
        };
        Self::from_config_file(file)
    }

    /// Creates a base config from a config file.
    fn from_config_file(mut file: ConfigFile) -> Result<Self, Failed> {
        let log_target = Self::log_target_from_config_file(&mut file)?;
        let res = Config {
            root: file.take_path("root")?.unwrap_or_default(),
            port: match file.take_u64("port")? {
                Some(port) => Some(file.check_port(port)?),
                None => None,
            },
            host: {
                file.take_string("host")?
                    .unwrap_or_else(|| DEFAULT_HOST.into())
            },
            directory_list: {
                file.take_bool("directory-list")?
                    .unwrap_or(DEFAULT_DIRECTORY_LIST)
            },
            max_age: {
                file.take_u64("max-age")?
                    .unwrap_or(ServerOptions::DEFAULT_MAX_AGE)
            },
            extensions: {
                file.take_string_array("extensions")?
                    .unwrap_or_else(default_extensions)
            },
            ssi: file.take_ssi_map("ssi")?.unwrap_or_default(),
            ssi_max_depth: {
                file.take_usize("ssi-max-depth")?
                    .unwrap_or(ServerOptions::DEFAULT_SSI_MAX_DEPTH)
            },
            include_timeout: {
                file.take_u64("include-timeout")?.map(Duration::from_secs)
            },
            tls_key: file.take_path("tls-key")?,
            tls_cert: file.take_path("tls-cert")?,
            log_level: {
                file.take_from_str("log-level")?.unwrap_or(LevelFilter::Warn)
            },
            log_target,
        };
        file.check_exhausted()?;
        Ok(res)
    }

    /// Determines the logging target from the config file.
    ///
    /// This is the Unix version that also deals with syslog.
    #[cfg(unix)]
    fn log_target_from_config_file(
        file: &mut ConfigFile
    ) -> Result<LogTarget, Failed> {
        let facility = file.take_string("syslog-facility")?;
        let facility = facility.as_deref().unwrap_or("daemon");
        let facility = match Facility::from_str(facility) {
            Ok(value) => value,
            Err(_) => {
                error!(
                    "Failed in config file {}: invalid syslog-facility.",
                    file.path.display()
                );
                return Err(Failed);
            }
        };
        let log_target = file.take_string("log")?;
        let log_file = file.take_path("log-file")?;
        match log_target.as_deref() {
            Some("stderr") | None => Ok(LogTarget::Stderr),
            Some("syslog") => Ok(LogTarget::Syslog(facility)),
            Some("file") => {
                match log_file {
                    Some(file) => Ok(LogTarget::File(file)),
                    None => {
                        error!(
                            "Failed in config file {}: \
                             log target \"file\" requires 'log-file' value.",
                            file.path.display()
                        );
                        Err(Failed)
                    }
                }
            }
            Some(value) => {
                error!(
                    "Failed in config file {}: \
                     invalid log target '{}'",
                     file.path.display(),
                     value
                );
                Err(Failed)
            }
        }
    }

    /// Determines the logging target from the config file.
    ///
    /// This is the non-Unix version that only logs to stderr or a file.
    #[cfg(not(unix))]
    fn log_target_from_config_file(
        file: &mut ConfigFile
    ) -> Result<LogTarget, Failed> {
        let log_target = file.take_string("log")?;
        let log_file = file.take_path("log-file")?;
        match log_target.as_deref() {
            Some("stderr") | None => Ok(LogTarget::Stderr),
            Some("file") => {
                match log_file {
                    Some(file) => Ok(LogTarget::File(file)),
                    None => {
                        error!(
                            "Failed in config file {}: \
                             log target \"file\" requires 'log-file' value.",
                            file.path.display()
                        );
                        Err(Failed)
                    }
                }
            }
            Some(value) => {
                error!(
                    "Failed in config file {}: \
                     invalid log target '{}'",
                    file.path.display(), value
                );
                Err(Failed)
            }
        }
    }

    /// Returns the listener options from the config.
    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            tls_key: self.tls_key.clone(),
            tls_cert: self.tls_cert.clone(),
        }
    }
}


//--- Default

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::new(),
            port: None,
            host: DEFAULT_HOST.into(),
            directory_list: DEFAULT_DIRECTORY_LIST,
            max_age: ServerOptions::DEFAULT_MAX_AGE,
            extensions: default_extensions(),
            ssi: HashMap::new(),
            ssi_max_depth: ServerOptions::DEFAULT_SSI_MAX_DEPTH,
            include_timeout: None,
            tls_key: None,
            tls_cert: None,
            log_level: LevelFilter::Warn,
            log_target: LogTarget::default(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|ext| String::from(*ext)).collect()
}


//------------ LogTarget -----------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Default)]
pub enum LogTarget {
    /// Syslog.
    ///
    /// The argument is the syslog facility to use.
    #[cfg(unix)]
    Syslog(Facility),

    /// Stderr.
    #[default]
    Stderr,

    /// A file.
    ///
    /// The argument is the file name.
    File(PathBuf)
}


//--- PartialEq and Eq

impl PartialEq for LogTarget {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            #[cfg(unix)]
            (&LogTarget::Syslog(s), &LogTarget::Syslog(o)) => {
                (s as usize) == (o as usize)
            }
            (&LogTarget::Stderr, &LogTarget::Stderr) => true,
            (LogTarget::File(s), LogTarget::File(o)) => {
                s == o
            }
            _ => false
        }
    }
}

impl Eq for LogTarget { }


//------------ ConfigArgs ----------------------------------------------------

/// The command line arguments.
#[derive(Clone, Debug, Parser)]
struct ConfigArgs {
    /// Read base configuration from this file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// The directory to serve [default: .]
    #[arg(value_name = "DIRECTORY")]
    directory: Option<PathBuf>,

    /// The port to listen on [default: 4000]
    #[arg(value_name = "PORT")]
    port: Option<u16>,

    /// The host name or address to listen on [default: localhost]
    #[arg(value_name = "HOST")]
    host: Option<String>,

    /// Don’t list directories without an index document
    #[arg(long)]
    no_directory_list: bool,

    /// Value of the max-age directive in responses
    #[arg(long, value_name = "SECONDS")]
    max_age: Option<u64>,

    /// Extension to try for missing path segments, can be repeated
    #[arg(long = "extension", value_name = "EXT")]
    extensions: Option<Vec<String>>,

    /// Process server-side includes in files with this extension
    #[arg(long, value_name = "EXT")]
    ssi: Option<Vec<String>>,

    /// Maximum number of nested includes
    #[arg(long, value_name = "COUNT")]
    ssi_max_depth: Option<usize>,

    /// Timeout for fetching includes from URLs
    #[arg(long, value_name = "SECONDS")]
    include_timeout: Option<u64>,

    /// Path to the TLS private key in PEM format
    #[arg(long, value_name = "PATH", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Path to the TLS certificate chain in PEM format
    #[arg(long, value_name = "PATH", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Log more information, twice for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Log less information, twice for no information
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,

    /// Log to syslog
    #[cfg(unix)]
    #[arg(long)]
    syslog: bool,

    /// Facility to use for syslog logging
    #[cfg(unix)]
    #[arg(long, value_name = "FACILITY")]
    syslog_facility: Option<String>,

    /// Log to this file
    #[arg(long, value_name = "PATH")]
    logfile: Option<String>,
}


//------------ ConfigFile ----------------------------------------------------

/// The content of a config file.
///
/// This is a thin wrapper around `toml::Table` to make dealing with it more
/// convenient.
#[derive(Clone, Debug)]
struct ConfigFile {
    /// The content of the file.
    content: toml::value::Table,

    /// The path to the config file.
    path: PathBuf,

    /// The directory we found the file in.
    ///
    /// This is used in relative paths.
    dir: PathBuf,
}

impl ConfigFile {
    /// Reads the config file at the given path.
    ///
    /// If there is no such file, returns `None`. If there is a file but it
    /// is broken, aborts.
    fn read(path: &Path) -> Result<Option<Self>, Failed> {
        let mut file = match fs::File::open(path) {
            Ok(file) => file,
            Err(_) => return Ok(None)
        };
        let mut config = String::new();
        if let Err(err) = file.read_to_string(&mut config) {
            error!(
                "Failed to read config file {}: {}",
                path.display(), err
            );
            return Err(Failed);
        }
        Self::parse(&config, path).map(Some)
    }

    /// Parses the content of the file from a string.
    fn parse(content: &str, path: &Path) -> Result<Self, Failed> {
        let content = match toml::from_str(content) {
            Ok(toml::Value::Table(content)) => content,
            Ok(_) => {
                error!(
                    "Failed to parse config file {}: Not a mapping.",
                    path.display()
                );
                return Err(Failed);
            }
            Err(err) => {
                error!(
                    "Failed to parse config file {}: {}",
                    path.display(), err
                );
                return Err(Failed);
            }
        };
        let path = if path.is_relative() {
            match env::current_dir() {
                Ok(dir) => dir.join(path),
                Err(err) => {
                    error!(
                        "Fatal: Can't determine current directory: {}.",
                        err
                    );
                    return Err(Failed);
                }
            }
        }
        else {
            path.into()
        };
        let dir = match path.parent() {
            Some(dir) => dir.into(),
            None => {
                error!(
                    "Fatal: config file {} has no parent directory.",
                    path.display()
                );
                return Err(Failed);
            }
        };
        Ok(ConfigFile { content, path, dir })
    }

    /// Takes a boolean value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t a booelan.
    fn take_bool(&mut self, key: &str) -> Result<Option<bool>, Failed> {
        match self.content.remove(key) {
            Some(value) => {
                if let toml::Value::Boolean(res) = value {
                    Ok(Some(res))
                }
                else {
                    error!(
                        "Failed in config file {}: \
                         '{}' expected to be a boolean.",
                        self.path.display(), key
                    );
                    Err(Failed)
                }
            }
            None => Ok(None)
        }
    }

    /// Takes an unsigned integer value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t an integer or if it is negative.
    fn take_u64(&mut self, key: &str) -> Result<Option<u64>, Failed> {
        match self.content.remove(key) {
            Some(value) => {
                if let toml::Value::Integer(res) = value {
                    u64::try_from(res).map(Some).map_err(|_| {
                        error!(
                            "Failed in config file {}: \
                            '{}' expected to be a positive integer.",
                            self.path.display(), key
                        );
                        Failed
                    })
                }
                else {
                    error!(
                        "Failed in config file {}: \
                         '{}' expected to be an integer.",
                        self.path.display(), key
                    );
                    Err(Failed)
                }
            }
            None => Ok(None)
        }
    }

    /// Takes an unsigned integer value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t an integer or if it is negative.
    fn take_usize(&mut self, key: &str) -> Result<Option<usize>, Failed> {
        match self.take_u64(key)? {
            Some(value) => {
                usize::try_from(value).map(Some).map_err(|_| {
                    error!(
                        "Failed in config file {}: \
                        value for '{}' is too large.",
                        self.path.display(), key
                    );
                    Failed
                })
            }
            None => Ok(None)
        }
    }

    /// Checks that a value is a valid port number.
    fn check_port(&self, value: u64) -> Result<u16, Failed> {
        u16::try_from(value).map_err(|_| {
            error!(
                "Failed in config file {}: invalid port {}.",
                self.path.display(), value
            );
            Failed
        })
    }

    /// Takes a string value from the config file.
    ///
    /// The value is taken from the given `key`. Returns `Ok(None)` if there
    /// is no such key. Returns an error if the key exists but the value
    /// isn’t a string.
    fn take_string(&mut self, key: &str) -> Result<Option<String>, Failed> {
        match self.content.remove(key) {
            Some(value) => {
                if let toml::Value::String(res) = value {
                    Ok(Some(res))
                }
                else {
                    error!(
                        "Failed in config file {}: \
                         '{}' expected to be a string.",
                        self.path.display(), key
                    );
                    Err(Failed)
                }
            }
            None => Ok(None)
        }
    }

    /// Takes a string encoded value from the config file.
    ///
    /// The value is taken from the given `key`. It is expected to be a
    /// string and will be converted to the final type via `FromStr::from_str`.
    ///
    /// Returns `Ok(None)` if the key doesn’t exist. Returns an error if the
    /// key exists but the value isn’t a string or conversion fails.
    fn take_from_str<T>(&mut self, key: &str) -> Result<Option<T>, Failed>
    where T: FromStr, T::Err: fmt::Display {
        match self.take_string(key)? {
            Some(value) => {
                match T::from_str(&value) {
                    Ok(some) => Ok(Some(some)),
                    Err(err) => {
                        error!(
                            "Failed in config file {}: \
                             illegal value in '{}': {}.",
                            self.path.display(), key, err
                        );
                        Err(Failed)
                    }
                }
            }
            None => Ok(None)
        }
    }

    /// Takes a path value from the config file.
    ///
    /// The path is taken from the given `key`. It must be a string value.
    /// It is treated as relative to the directory of the config file. If it
    /// is indeed a relative path, it is expanded accordingly and an absolute
    /// path is returned.
    ///
    /// Returns `Ok(None)` if the key does not exist. Returns an error if the
    /// key exists but the value isn’t a string.
    fn take_path(&mut self, key: &str) -> Result<Option<PathBuf>, Failed> {
        self.take_string(key).map(|opt| opt.map(|path| self.dir.join(path)))
    }

    /// Takes an array of strings from the config file.
    ///
    /// The value is taken from the entry with the given `key` and, if
    /// present, the entry is removed. The value must be an array of strings.
    /// If the key is not present, returns `Ok(None)`. If the entry is present
    /// but not an array of strings, returns an error.
    fn take_string_array(
        &mut self,
        key: &str
    ) -> Result<Option<Vec<String>>, Failed> {
        match self.content.remove(key) {
            Some(value) => self.string_array(key, value).map(Some),
            None => Ok(None)
        }
    }

    /// Converts a value into an array of strings.
    ///
    /// The `key` is only used in the error message.
    fn string_array(
        &self, key: &str, value: toml::Value
    ) -> Result<Vec<String>, Failed> {
        let vec = match value {
            toml::Value::Array(vec) => vec,
            _ => {
                error!(
                    "Failed in config file {}: \
                     '{}' expected to be a array of strings.",
                    self.path.display(), key
                );
                return Err(Failed)
            }
        };
        let mut res = Vec::new();
        for value in vec.into_iter() {
            if let toml::Value::String(value) = value {
                res.push(value)
            }
            else {
                error!(
                    "Failed in config file {}: \
                    '{}' expected to be a array of strings.",
                    self.path.display(),
                    key
                );
                return Err(Failed);
            }
        }
        Ok(res)
    }

    /// Takes the SSI handler configuration from the config file.
    ///
    /// The value must be a table mapping file extensions to arrays of
    /// handler names.
    fn take_ssi_map(
        &mut self,
        key: &str
    ) -> Result<Option<HashMap<String, Vec<HandlerKind>>>, Failed> {
        let table = match self.content.remove(key) {
            Some(toml::Value::Table(table)) => table,
            Some(_) => {
                error!(
                    "Failed in config file {}: \
                     '{}' expected to be a table.",
                    self.path.display(), key
                );
                return Err(Failed)
            }
            None => return Ok(None)
        };
        let mut res = HashMap::new();
        for (ext, value) in table {
            let item_key = format!("{}.{}", key, ext);
            let mut handlers = Vec::new();
            for name in self.string_array(&item_key, value)? {
                match HandlerKind::from_str(&name) {
                    Ok(kind) => handlers.push(kind),
                    Err(err) => {
                        error!(
                            "Failed in config file {}: \
                             illegal value in '{}': {}.",
                            self.path.display(), item_key, err
                        );
                        return Err(Failed)
                    }
                }
            }
            res.insert(ext, handlers);
        }
        Ok(Some(res))
    }

    /// Checks whether the config file is now empty.
    ///
    /// If it isn’t, logs a complaint and returns an error.
    fn check_exhausted(&self) -> Result<(), Failed> {
        if !self.content.is_empty() {
            let keys: Vec<_> = self.content.keys().map(String::as_str).collect();
            error!(
                "Failed in config file {}: Unknown settings {}.",
                self.path.display(), keys.join(",")
            );
            Err(Failed)
        }
        else {
            Ok(())
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;

    fn process_args(args: &[&str]) -> Config {
        let mut config = Config::default();
        let matches = Config::config_args(
            Command::new("fs-serve")
        ).get_matches_from(args);
        config.apply_args(
            ConfigArgs::from_arg_matches(&matches).unwrap(),
            Path::new("/test")
        ).unwrap();
        config
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.port, None);
        assert_eq!(config.host, "localhost");
        assert!(config.directory_list);
        assert_eq!(config.max_age, 2);
        assert_eq!(config.extensions, ["html", "shtml"]);
        assert!(config.ssi.is_empty());
        assert_eq!(config.ssi_max_depth, 16);
        assert_eq!(config.include_timeout, None);
        assert_eq!(config.log_level, LevelFilter::Warn);
        assert_eq!(config.log_target, LogTarget::Stderr);
    }

    #[test]
    #[cfg(unix)] // ... because of drive letters in absolute paths on Windows.
    fn good_config_file() {
        let config = ConfigFile::parse(
            "root = \"site\"\n\
             port = 8080\n\
             host = \"::\"\n\
             directory-list = false\n\
             max-age = 60\n\
             extensions = [\"htm\"]\n\
             ssi-max-depth = 4\n\
             include-timeout = 10\n\
             tls-key = \"/etc/key.pem\"\n\
             tls-cert = \"cert.pem\"\n\
             log-level = \"info\"\n\
             log = \"file\"\n\
             log-file = \"foo.log\"\n\
             [ssi]\n\
             shtml = [\"file\", \"virtual\", \"url\"]\n\
             html = []\n",
            Path::new("/test/fs-serve.conf")
        ).unwrap();
        let config = Config::from_config_file(config).unwrap();
        assert_eq!(config.root, Path::new("/test/site"));
        assert_eq!(config.port, Some(8080));
        assert_eq!(config.host, "::");
        assert!(!config.directory_list);
        assert_eq!(config.max_age, 60);
        assert_eq!(config.extensions, ["htm"]);
        assert_eq!(
            config.ssi.get("shtml").unwrap(),
            &[HandlerKind::File, HandlerKind::Virtual, HandlerKind::Url]
        );
        assert!(config.ssi.get("html").unwrap().is_empty());
        assert_eq!(config.ssi_max_depth, 4);
        assert_eq!(config.include_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.tls_key, Some(PathBuf::from("/etc/key.pem")));
        assert_eq!(config.tls_cert, Some(PathBuf::from("/test/cert.pem")));
        assert_eq!(config.log_level, LevelFilter::Info);
        assert_eq!(
            config.log_target,
            LogTarget::File(PathBuf::from("/test/foo.log"))
        );
    }

    #[test]
    #[cfg(unix)]
    fn minimal_config_file() {
        let config = ConfigFile::parse(
            "",
            Path::new("/test/fs-serve.conf")
        ).unwrap();
        let config = Config::from_config_file(config).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn bad_config_file() {
        let config = ConfigFile::parse(
            "port = -1", Path::new("/test/fs-serve.conf")
        ).unwrap();
        assert!(Config::from_config_file(config).is_err());
        let config = ConfigFile::parse(
            "port = 70000", Path::new("/test/fs-serve.conf")
        ).unwrap();
        assert!(Config::from_config_file(config).is_err());
        let config = ConfigFile::parse(
            "[ssi]\nshtml = [\"exec\"]", Path::new("/test/fs-serve.conf")
        ).unwrap();
        assert!(Config::from_config_file(config).is_err());
        let config = ConfigFile::parse(
            "ssi = [\"shtml\"]", Path::new("/test/fs-serve.conf")
        ).unwrap();
        assert!(Config::from_config_file(config).is_err());
        let config = ConfigFile::parse(
            "log = \"file\"", Path::new("/test/fs-serve.conf")
        ).unwrap();
        assert!(Config::from_config_file(config).is_err());
        let config = ConfigFile::parse(
            "no-such-setting = true", Path::new("/test/fs-serve.conf")
        ).unwrap();
        assert!(Config::from_config_file(config).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn positional_args() {
        let config = process_args(&["fs-serve"]);
        assert_eq!(config.root, Path::new("/test"));
        assert_eq!(config.port, None);
        assert_eq!(config.host, "localhost");

        let config = process_args(&["fs-serve", "site", "8000", "0.0.0.0"]);
        assert_eq!(config.root, Path::new("/test/site"));
        assert_eq!(config.port, Some(8000));
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    #[cfg(unix)]
    fn option_args() {
        let config = process_args(&[
            "fs-serve", "--no-directory-list", "--max-age", "30",
            "--extension", "htm", "--extension", ".txt",
            "--ssi", "shtml", "--ssi-max-depth", "3",
            "--include-timeout", "5",
            "--tls-key", "key.pem", "--tls-cert", "/etc/cert.pem",
        ]);
        assert!(!config.directory_list);
        assert_eq!(config.max_age, 30);
        assert_eq!(config.extensions, ["htm", "txt"]);
        assert_eq!(
            config.ssi.get("shtml").unwrap(), HandlerKind::DEFAULT_CHAIN
        );
        assert_eq!(config.ssi_max_depth, 3);
        assert_eq!(config.include_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.tls_key, Some(PathBuf::from("/test/key.pem")));
        assert_eq!(config.tls_cert, Some(PathBuf::from("/etc/cert.pem")));
    }

    #[test]
    fn verbosity() {
        let config = process_args(&["fs-serve"]);
        assert_eq!(config.log_level, LevelFilter::Warn);
        let config = process_args(&["fs-serve", "-v"]);
        assert_eq!(config.log_level, LevelFilter::Info);
        let config = process_args(&["fs-serve", "-vv"]);
        assert_eq!(config.log_level, LevelFilter::Debug);
        let config = process_args(&["fs-serve", "-q"]);
        assert_eq!(config.log_level, LevelFilter::Error);
        let config = process_args(&["fs-serve", "-qq"]);
        assert_eq!(config.log_level, LevelFilter::Off);
    }

    #[test]
    #[cfg(unix)]
    fn log_args() {
        let config = process_args(&["fs-serve", "--logfile", "log.txt"]);
        assert_eq!(
            config.log_target, LogTarget::File(PathBuf::from("/test/log.txt"))
        );
        let config = process_args(&["fs-serve", "--logfile", "-"]);
        assert_eq!(config.log_target, LogTarget::Stderr);
        let config = process_args(&[
            "fs-serve", "--syslog", "--syslog-facility", "local3"
        ]);
        assert_eq!(config.log_target, LogTarget::Syslog(Facility::LOG_LOCAL3));
    }

    #[test]
    fn check_args() {
        ConfigArgs::command().debug_assert();
    }
}
