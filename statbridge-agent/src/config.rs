use statbridge_metrics::catalog::*;
use statbridge_metrics::probe::DEFAULT_FETCH_TIMEOUT;
use statbridge_metrics::scheduler::DEFAULT_POLL_DELAY;
use statbridge_metrics::{ExpiryPolicy, Family};
use statbridge_utils::args;

use anyhow::{ensure, Result};
use clap::Parser;
use std::time::Duration;

#[derive(Debug, clap::Args)]
pub struct PollArgGroup {
    /// Seconds to wait after a poll completes before starting the next one
    #[arg(long, env = "STATBRIDGE_POLL_INTERVAL", default_value_t = DEFAULT_POLL_DELAY.as_secs())]
    poll_interval_secs: u64,

    /// Seconds to wait before the first poll
    #[arg(long, default_value_t = 0)]
    initial_delay_secs: u64,

    /// Seconds a single snapshot fetch may take before the poll is abandoned
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs())]
    fetch_timeout_secs: u64,

    /// Stop reporting an entity once it has been missing from snapshots for this many seconds. By
    /// default the last known value is reported forever.
    #[arg(long)]
    entity_ttl_secs: Option<u64>,
}

///
/// Timing shared by every probe
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub initial_delay: Duration,
    pub delay: Duration,
    pub fetch_timeout: Duration,
    pub expiry: ExpiryPolicy,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            delay: DEFAULT_POLL_DELAY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            expiry: ExpiryPolicy::Never,
        }
    }
}

impl TryFrom<&PollArgGroup> for Schedule {
    type Error = anyhow::Error;

    fn try_from(g: &PollArgGroup) -> Result<Self> {
        ensure!(g.poll_interval_secs > 0, "poll interval must be non-zero");
        ensure!(g.fetch_timeout_secs > 0, "fetch timeout must be non-zero");
        Ok(Self {
            initial_delay: Duration::from_secs(g.initial_delay_secs),
            delay: Duration::from_secs(g.poll_interval_secs),
            fetch_timeout: Duration::from_secs(g.fetch_timeout_secs),
            expiry: match g.entity_ttl_secs {
                Some(secs) => ExpiryPolicy::After(Duration::from_secs(secs)),
                None => ExpiryPolicy::Never,
            },
        })
    }
}

#[derive(Debug, clap::Args)]
pub struct FamilyArgGroup {
    /// Poll per-process-definition statistics
    #[arg(long, env = "STATBRIDGE_PROCESSDEFINITIONS", default_value_t = true, action = clap::ArgAction::Set)]
    processdefinitions: bool,

    /// Poll server-wide statistics
    #[arg(long, env = "STATBRIDGE_SERVERINFO", default_value_t = true, action = clap::ArgAction::Set)]
    serverinfo: bool,

    /// Poll per-queue statistics
    #[arg(long, env = "STATBRIDGE_QUEUEINFO", default_value_t = true, action = clap::ArgAction::Set)]
    queueinfo: bool,

    /// Poll per-topic statistics
    #[arg(long, env = "STATBRIDGE_TOPICINFO", default_value_t = false, action = clap::ArgAction::Set)]
    topicinfo: bool,

    /// Poll per-durable-subscriber statistics
    #[arg(long, env = "STATBRIDGE_DURABLEINFO", default_value_t = false, action = clap::ArgAction::Set)]
    durableinfo: bool,
}

impl FamilyArgGroup {
    pub fn enabled(&self) -> Vec<Family> {
        [
            (self.processdefinitions, PROCESS_DEFINITIONS),
            (self.serverinfo, SERVER_INFO),
            (self.queueinfo, QUEUE_INFO),
            (self.topicinfo, TOPIC_INFO),
            (self.durableinfo, DURABLE_INFO),
        ]
        .into_iter()
        .filter_map(|(enabled, family)| enabled.then_some(family))
        .collect()
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(flatten)]
    pub poll: PollArgGroup,

    #[clap(flatten)]
    pub families: FamilyArgGroup,

    #[clap(flatten)]
    pub source: args::source::SourceArgGroup,

    #[clap(flatten)]
    pub log: args::log::LogArgGroup,

    #[clap(flatten)]
    pub metrics: args::metrics::MetricsArgGroup,
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("statbridge").chain(args.iter().copied()))
            .expect("parse")
    }

    #[test]
    fn default_families() {
        let args = parse(&[]);
        let names: Vec<_> = args.families.enabled().iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec!["process_definitions", "server_info", "queue_info"]
        );
    }

    #[test]
    fn families_are_toggled_by_value() {
        let args = parse(&["--topicinfo", "true", "--serverinfo", "false"]);
        let enabled = args.families.enabled();
        assert!(enabled.contains(&TOPIC_INFO));
        assert!(!enabled.contains(&SERVER_INFO));
        assert!(!enabled.contains(&DURABLE_INFO));
    }

    #[test]
    fn default_schedule() {
        let args = parse(&[]);
        let schedule = Schedule::try_from(&args.poll).expect("schedule");
        assert_eq!(schedule, Schedule::default());
        assert_eq!(schedule.delay, Duration::from_secs(60));
        assert_eq!(schedule.fetch_timeout, Duration::from_secs(10));
    }

    #[test]
    fn schedule_from_args() {
        let args = parse(&[
            "--poll-interval-secs",
            "5",
            "--initial-delay-secs",
            "2",
            "--entity-ttl-secs",
            "300",
        ]);
        let schedule = Schedule::try_from(&args.poll).expect("schedule");
        assert_eq!(schedule.delay, Duration::from_secs(5));
        assert_eq!(schedule.initial_delay, Duration::from_secs(2));
        assert_eq!(
            schedule.expiry,
            ExpiryPolicy::After(Duration::from_secs(300))
        );
    }

    #[test]
    fn zero_interval_is_rejected() {
        let args = parse(&["--poll-interval-secs", "0"]);
        assert!(Schedule::try_from(&args.poll).is_err());
    }
}
