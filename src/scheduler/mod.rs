// mongobackup/src/scheduler/mod.rs
//! Process-wide cron timer that dispatches backup runs.

use anyhow::Result;
use chrono::{DateTime, Local};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backup::{Orchestrator, PipelineOutcome};

/// A cron expression evaluated in the process's local timezone.
///
/// Accepts the classic 5-field form (`min hour dom month dow`), which gets a
/// leading `0` seconds field, as well as the 6/7-field form of the `cron` crate.
/// In the 5-field form the day of week follows classic cron numbering
/// (0 and 7 are Sunday); the 6/7-field form uses the crate's (1 is Sunday).
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let trimmed = expression.trim();
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let day_of_week = classic_day_of_week(fields[4])
                    .map_err(|e| format!("{} in '{}'", e, trimmed))?;
                format!("0 {} {}", fields[..4].join(" "), day_of_week)
            }
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(format!(
                    "expected 5, 6 or 7 fields but found {} in '{}'",
                    n, trimmed
                ));
            }
        };
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| format!("{} in '{}'", e, trimmed))?;
        Ok(CronSchedule {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(after).next()
    }
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn day_of_week_value(token: &str) -> Result<u32, String> {
    if let Ok(n) = token.parse::<u32>() {
        if n <= 7 {
            return Ok(n);
        }
    } else if let Some(index) = DAY_NAMES.iter().position(|d| d.eq_ignore_ascii_case(token)) {
        return Ok(index as u32);
    }
    Err(format!("invalid day of week '{}'", token))
}

/// Rewrites a classic cron day-of-week field (0-7, Sunday = 0 or 7) as an
/// explicit list in the `cron` crate's numbering (1-7, Sunday = 1).
fn classic_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid step '{}'", step))?;
                (base, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if base == "*" || base == "?" {
            (0, 6)
        } else if let Some((from, to)) = base.split_once('-') {
            (day_of_week_value(from)?, day_of_week_value(to)?)
        } else {
            let day = day_of_week_value(base)?;
            // `n/step` runs from n to the end of the week
            (day, if step.is_some() { 7 } else { day })
        };
        if start > end {
            return Err(format!("invalid day-of-week range '{}'", base));
        }

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days[(day % 7) as usize] = true;
        }
    }

    Ok(days
        .iter()
        .enumerate()
        .filter(|(_, selected)| **selected)
        .map(|(day, _)| (day + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fires the orchestrator on every tick of the schedule, forever.
///
/// Runs are not serialized: if a tick arrives while an earlier run is still
/// going, a second run starts alongside it and a warning is logged.
pub struct Scheduler {
    schedule: CronSchedule,
    orchestrator: Arc<Orchestrator>,
    in_flight: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(schedule: CronSchedule, orchestrator: Arc<Orchestrator>) -> Self {
        Scheduler {
            schedule,
            orchestrator,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Dispatches one run on its own task and returns immediately.
    pub fn fire(&self) -> JoinHandle<PipelineOutcome> {
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            warn!(
                in_flight = previous,
                "Previous backup run still in progress; starting another one anyway"
            );
        }

        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            let _guard = guard;
            orchestrator.run().await
        })
    }

    /// Sleeps until each scheduled time and fires. Only returns if the
    /// expression has no future occurrence.
    pub async fn run_forever(&self) -> Result<()> {
        info!("⏰ Backup schedule: '{}' (local time)", self.schedule.expression());
        let mut last_fire: Option<DateTime<Local>> = None;

        loop {
            let now = Local::now();
            // An early wake-up must not land on the tick that just fired.
            let from = match last_fire {
                Some(last) if last > now => last,
                _ => now,
            };
            let Some(next) = self.schedule.next_after(&from) else {
                anyhow::bail!(
                    "Schedule '{}' has no upcoming fire time",
                    self.schedule.expression()
                );
            };

            info!("Next backup at {}", next.format("%Y-%m-%d %H:%M:%S %Z"));
            let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            last_fire = Some(next);
            info!(in_flight = self.in_flight(), "Starting scheduled backup process...");
            drop(self.fire());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::PipelineSettings;
    use crate::backup::pipeline::StageKind;
    use crate::backup::testing::{MockDump, MockUpload, RecordingCleaner, call_log};
    use chrono::{Datelike, TimeZone, Timelike, Weekday};
    use tokio::sync::Semaphore;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn test_five_field_default_fires_daily_at_two() -> Result<(), String> {
        let schedule = CronSchedule::parse("0 2 * * *")?;
        assert_eq!(schedule.expression(), "0 2 * * *");

        let next = schedule.next_after(&local(2024, 3, 5, 1, 30)).expect("next tick");
        assert_eq!(next, local(2024, 3, 5, 2, 0));

        let following = schedule.next_after(&next).expect("following tick");
        assert_eq!(following, local(2024, 3, 6, 2, 0));
        Ok(())
    }

    #[test]
    fn test_five_field_day_of_week_uses_classic_numbering() -> Result<(), String> {
        // 2024-05-07 is a Tuesday.
        let tuesday = local(2024, 5, 7, 3, 0);

        let mondays = CronSchedule::parse("0 2 * * 1")?;
        let next = mondays.next_after(&tuesday).expect("next tick");
        assert_eq!(next, local(2024, 5, 13, 2, 0));
        assert_eq!(next.weekday(), Weekday::Mon);

        for sunday in ["0 2 * * 0", "0 2 * * 7", "0 2 * * SUN"] {
            let next = CronSchedule::parse(sunday)?.next_after(&tuesday).expect("next tick");
            assert_eq!(next, local(2024, 5, 12, 2, 0), "{}", sunday);
        }

        // Past Friday's tick, weekdays skip straight to Monday.
        let friday = local(2024, 5, 10, 3, 0);
        for weekdays in ["0 2 * * 1-5", "0 2 * * MON-FRI"] {
            let next = CronSchedule::parse(weekdays)?.next_after(&friday).expect("next tick");
            assert_eq!(next.weekday(), Weekday::Mon, "{}", weekdays);
        }
        Ok(())
    }

    #[test]
    fn test_classic_day_of_week_translation() -> Result<(), String> {
        assert_eq!(classic_day_of_week("*")?, "*");
        assert_eq!(classic_day_of_week("1-5")?, "2,3,4,5,6");
        assert_eq!(classic_day_of_week("0,7")?, "1");
        assert_eq!(classic_day_of_week("5-7")?, "1,6,7");
        assert_eq!(classic_day_of_week("*/2")?, "1,3,5,7");
        assert_eq!(classic_day_of_week("sat,sun")?, "1,7");
        assert!(classic_day_of_week("8").is_err());
        assert!(classic_day_of_week("5-1").is_err());
        assert!(classic_day_of_week("*/0").is_err());
        Ok(())
    }

    #[test]
    fn test_six_field_expression_is_accepted() -> Result<(), String> {
        let schedule = CronSchedule::parse("0 30 3 * * *")?;
        let next = schedule.next_after(&local(2024, 3, 5, 4, 0)).expect("next tick");
        assert_eq!((next.hour(), next.minute()), (3, 30));
        assert_eq!(next.date_naive(), local(2024, 3, 6, 0, 0).date_naive());
        Ok(())
    }

    #[test]
    fn test_invalid_expressions_are_rejected() {
        assert!(CronSchedule::parse("").is_err());
        assert!(CronSchedule::parse("every day").is_err());
        assert!(CronSchedule::parse("0 25 * * *").is_err());
        assert!(CronSchedule::parse("0 2 * * 8").is_err());
    }

    #[tokio::test]
    async fn test_keeps_firing_after_failed_runs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let calls = call_log();
        let orchestrator = Orchestrator::new(
            PipelineSettings {
                backup_dir: dir.path().to_path_buf(),
                bucket: "nightly".to_string(),
                key_prefix: "mongo".to_string(),
            },
            Arc::new(MockDump::failing(calls.clone(), "connection refused")),
            Arc::new(MockUpload::succeeding(calls.clone())),
            Arc::new(RecordingCleaner::new(calls.clone())),
        );
        let schedule = CronSchedule::parse("* * * * * *").map_err(anyhow::Error::msg)?;
        let scheduler = Scheduler::new(schedule, Arc::new(orchestrator));

        let result = tokio::time::timeout(Duration::from_millis(2500), scheduler.run_forever()).await;
        assert!(result.is_err(), "run_forever returned early: {:?}", result);

        // Let the last dispatched run record its dump call.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let recorded = calls.lock().unwrap().clone();
        let dumps = recorded.iter().filter(|c| **c == "dump").count();
        assert!(dumps >= 2, "expected at least two runs, got {:?}", recorded);
        assert!(!recorded.contains(&"upload"));
        assert!(!recorded.contains(&"cleanup"));
        Ok(())
    }

    #[tokio::test]
    async fn test_fire_while_run_in_progress_starts_second_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let calls = call_log();
        let gate = Arc::new(Semaphore::new(0));
        let orchestrator = Orchestrator::new(
            PipelineSettings {
                backup_dir: dir.path().to_path_buf(),
                bucket: "nightly".to_string(),
                key_prefix: "mongo".to_string(),
            },
            Arc::new(MockDump::succeeding(calls.clone())),
            Arc::new(MockUpload::gated(calls.clone(), gate.clone())),
            Arc::new(RecordingCleaner::new(calls.clone())),
        );
        let scheduler = Scheduler::new(CronSchedule::parse("0 2 * * *").map_err(anyhow::Error::msg)?, Arc::new(orchestrator));

        let first = scheduler.fire();
        let second = scheduler.fire();

        // Both runs reach the upload stage before either finishes.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let uploads = calls.lock().unwrap().iter().filter(|c| **c == "upload").count();
                if uploads == 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        assert_eq!(scheduler.in_flight(), 2);

        gate.add_permits(2);
        let outcomes = [first.await?, second.await?];

        assert_eq!(scheduler.in_flight(), 0);
        assert!(outcomes.iter().all(PipelineOutcome::backup_stored));
        // Same-day runs share one artifact path: whichever cleans up second
        // finds the file already gone.
        let cleanup_failures = outcomes
            .iter()
            .filter(|o| o.failed_stage() == Some(StageKind::Cleanup))
            .count();
        assert_eq!(cleanup_failures, 1);
        Ok(())
    }
}
