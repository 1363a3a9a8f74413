//! Schedule command - allowed-hours checks

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use shield_core::schedule::{
    describe_window, is_allowed_now, minutes_until_allowed, next_allowed, Clock, SystemClock,
    TimeOfDay,
};
use shield_core::Profile;

/// Schedule command arguments
#[derive(Args, Debug)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub action: ScheduleAction,
}

/// Schedule subcommands
#[derive(Subcommand, Debug)]
pub enum ScheduleAction {
    /// Check whether a time falls inside an allowed window
    Check {
        /// Window start (HH:MM)
        #[arg(long)]
        start: TimeOfDay,

        /// Window end (HH:MM, inclusive; may be earlier than start)
        #[arg(long)]
        end: TimeOfDay,

        /// Time to check (HH:MM, default: now)
        #[arg(long)]
        at: Option<TimeOfDay>,
    },
}

/// Execute schedule command
pub fn execute(args: ScheduleArgs) -> Result<()> {
    match args.action {
        ScheduleAction::Check { start, end, at } => {
            let now = at.unwrap_or_else(|| SystemClock.now());
            let report = check(start, end, now);
            print_report(&report, now);
            Ok(())
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Report {
    window: String,
    allowed: bool,
    next: Option<TimeOfDay>,
    wait_minutes: u16,
}

fn check(start: TimeOfDay, end: TimeOfDay, now: TimeOfDay) -> Report {
    let profile = Profile::new(0, "check").with_schedule(start.minutes(), end.minutes());
    Report {
        window: describe_window(&profile),
        allowed: is_allowed_now(&profile, now),
        next: next_allowed(&profile, now),
        wait_minutes: minutes_until_allowed(&profile, now),
    }
}

fn print_report(report: &Report, now: TimeOfDay) {
    println!("Window: {}", report.window.cyan());
    println!("Time: {now}");
    if report.allowed {
        println!("{} Access allowed", "✓".green());
    } else {
        println!("{} Outside allowed hours", "✗".red());
        if let Some(next) = report.next {
            println!(
                "  Allowed again at {next} (in {}h {:02}m)",
                report.wait_minutes / 60,
                report.wait_minutes % 60
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn test_check_inside_window() {
        let report = check(t("08:00"), t("21:00"), t("21:00"));
        assert!(report.allowed);
        assert_eq!(report.next, None);
        assert_eq!(report.wait_minutes, 0);
        assert_eq!(report.window, "08:00-21:00");
    }

    #[test]
    fn test_check_outside_window() {
        let report = check(t("08:00"), t("21:00"), t("23:00"));
        assert!(!report.allowed);
        assert_eq!(report.next, Some(t("08:00")));
        assert_eq!(report.wait_minutes, 9 * 60);
    }

    #[test]
    fn test_check_wraparound() {
        assert!(check(t("22:00"), t("06:00"), t("02:30")).allowed);
        assert!(!check(t("22:00"), t("06:00"), t("12:00")).allowed);
    }
}
