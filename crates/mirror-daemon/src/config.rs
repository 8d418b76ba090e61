//! Command line arguments and the resolved mirror configuration.

use crate::detector::DEFAULT_SYNC_INTERVAL;
use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use mirror_core::materializer::CollisionPolicy;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Database file name used when `--database` is not given.
pub const DEFAULT_DATABASE: &str = "notes.db";

#[derive(Parser, Debug)]
#[command(name = "note-mirror")]
#[command(about = "Keeps a plaintext mirror of an encrypted note store")]
pub struct Args {
    /// Account email
    #[arg(long, env = "NOTE_MIRROR_EMAIL")]
    pub email: Option<String>,

    /// Account password
    #[arg(long, env = "NOTE_MIRROR_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Shared directory holding the remote note store
    #[arg(long, env = "NOTE_MIRROR_REMOTE")]
    pub remote: PathBuf,

    /// Mirror root directory
    #[arg(short, long, default_value = ".", env = "NOTE_MIRROR_ROOT")]
    pub root: PathBuf,

    /// Directory for note files, relative to the root
    #[arg(long, default_value = "notes")]
    pub notes_dir: String,

    /// Cache database path (default: <root>/notes.db)
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Seconds between sync cycles in watch mode
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL.as_secs())]
    pub interval_secs: u64,

    /// Give notes with clashing titles their own file instead of sharing one
    #[arg(long)]
    pub suffix_collisions: bool,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Sync, then print every cached note as `uuid - title`
    List,
    /// Run one sync cycle and exit
    Sync,
    /// Sync, mirror all notes and keep watching for changes (default)
    Watch,
}

/// Everything the daemon needs to start, validated.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub root: PathBuf,
    pub notes_dir: String,
    pub database: PathBuf,
    pub remote_dir: PathBuf,
    pub email: String,
    pub password: String,
    pub sync_interval: Duration,
    pub collision_policy: CollisionPolicy,
}

impl MirrorConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let (Some(email), Some(password)) = (&args.email, &args.password) else {
            bail!(
                "No login information: use --email and --password \
                 (or NOTE_MIRROR_EMAIL and NOTE_MIRROR_PASSWORD)"
            );
        };

        let config = Self {
            root: args.root.clone(),
            notes_dir: args.notes_dir.clone(),
            database: args
                .database
                .clone()
                .unwrap_or_else(|| args.root.join(DEFAULT_DATABASE)),
            remote_dir: args.remote.clone(),
            email: email.clone(),
            password: password.clone(),
            sync_interval: Duration::from_secs(args.interval_secs),
            collision_policy: if args.suffix_collisions {
                CollisionPolicy::SuffixUuid
            } else {
                CollisionPolicy::Overwrite
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() {
            bail!("Email must not be empty");
        }
        if self.sync_interval.is_zero() {
            bail!("Sync interval must be at least one second");
        }

        let notes_dir = Path::new(&self.notes_dir);
        let escapes = notes_dir
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            bail!(
                "Notes directory must be a relative path inside the root: {}",
                self.notes_dir
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "note-mirror",
            "--email",
            "user@example.com",
            "--password",
            "secret",
            "--remote",
            "/srv/notes",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--root", "/home/me/mirror"]);
        let config = MirrorConfig::from_args(&args).unwrap();

        assert_eq!(args.command, None);
        assert_eq!(config.notes_dir, "notes");
        assert_eq!(config.database, PathBuf::from("/home/me/mirror/notes.db"));
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.collision_policy, CollisionPolicy::Overwrite);
    }

    #[test]
    fn test_overrides_and_subcommand() {
        let args = parse(&[
            "--database",
            "/tmp/cache.db",
            "--interval-secs",
            "5",
            "--suffix-collisions",
            "sync",
        ]);
        let config = MirrorConfig::from_args(&args).unwrap();

        assert_eq!(args.command, Some(Command::Sync));
        assert_eq!(config.database, PathBuf::from("/tmp/cache.db"));
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.collision_policy, CollisionPolicy::SuffixUuid);
    }

    #[test]
    fn test_missing_credentials() {
        let mut args = parse(&[]);
        args.password = None;

        assert!(MirrorConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let args = parse(&["--interval-secs", "0"]);
        assert!(MirrorConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_rejects_notes_dir_outside_root() {
        assert!(MirrorConfig::from_args(&parse(&["--notes-dir", "../elsewhere"])).is_err());
        assert!(MirrorConfig::from_args(&parse(&["--notes-dir", "/abs"])).is_err());
        assert!(MirrorConfig::from_args(&parse(&["--notes-dir", "./notes/sub"])).is_ok());
    }
}
