//! Replay a heart rate capture through a wearable/companion pair.
//!
//! Feeds each row of a CSV capture to a simulated wearable endpoint linked
//! to a companion, then prints the resulting alarm timeline.

mod capture;
mod sim;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use time::Time;
use time::macros::format_description;
use tracing_subscriber::EnvFilter;

use fitalarm::alarm::{AlarmState, parse_time_of_day};

use crate::sim::{ReplayOptions, TimelineEntry, TimelineEvent};

#[derive(Parser, Debug)]
#[command(name = "fitalarm-replay")]
#[command(about = "Replay a heart rate capture through the alarm engine")]
struct Args {
    /// CSV capture with `seconds,bpm` columns
    capture: PathBuf,

    /// Heart rate threshold in beats per minute
    #[arg(short, long)]
    threshold: u32,

    /// Number of samples averaged by the smoother
    #[arg(short, long, default_value_t = 5)]
    window: usize,

    /// Scheduled alarm time (HH:MM)
    #[arg(short, long)]
    scheduled: Option<String>,

    /// Wall clock time of the first row (HH:MM)
    #[arg(long, default_value = "06:00")]
    start: String,

    /// Make the peer unreachable at this many seconds into the capture
    #[arg(long)]
    drop_link_at: Option<f64>,
}

impl Args {
    fn options(&self) -> Result<ReplayOptions> {
        if self.threshold == 0 {
            anyhow::bail!("threshold must be positive");
        }
        if self.window == 0 {
            anyhow::bail!("window must be at least one sample");
        }
        Ok(ReplayOptions {
            threshold: self.threshold,
            window: self.window,
            scheduled: self.scheduled.as_deref().map(parse_time).transpose()?,
            start: parse_time(&self.start)?,
            drop_link_at: self.drop_link_at,
        })
    }
}

fn parse_time(text: &str) -> Result<Time> {
    parse_time_of_day(text).with_context(|| format!("invalid time {text:?}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = args.options()?;

    let rows = capture::load(&args.capture)
        .with_context(|| format!("failed to load {}", args.capture.display()))?;
    let timeline = sim::replay(&rows, &options).await?;

    println!(
        "{} {} samples, threshold {} bpm, window {}",
        "Capture:".bold(),
        rows.len(),
        options.threshold,
        options.window
    );
    println!();
    for entry in &timeline {
        print_entry(entry);
    }
    println!();
    print_summary(&timeline);

    Ok(())
}

fn print_entry(entry: &TimelineEntry) {
    let clock = entry
        .wall
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default();
    let prefix = format!("{:>8.1}s {}", entry.seconds, clock).dimmed();

    match &entry.event {
        TimelineEvent::Transition {
            endpoint,
            from,
            to,
            cause,
            average,
            last_send,
        } => {
            let mut line = format!("{endpoint:<9} {from} -> {}", paint_state(*to));
            if let Some(cause) = cause {
                line.push_str(&format!(" ({cause})"));
            }
            if let Some(avg) = average {
                line.push_str(&format!(" avg {avg:.1}"));
            }
            if let Some(outcome) = last_send {
                line.push_str(&format!(" send {outcome}"));
            }
            println!("{prefix} {line}");
        }
        TimelineEvent::Feedback { endpoint, active } => {
            let what = if *active {
                "feedback on".yellow()
            } else {
                "feedback off".normal()
            };
            println!("{prefix} {endpoint:<9} {what}");
        }
        TimelineEvent::LinkDropped => {
            println!("{prefix} {}", "peer link dropped".red().bold());
        }
    }
}

fn paint_state(state: AlarmState) -> colored::ColoredString {
    let text = state.to_string();
    match state {
        AlarmState::Triggered => text.red().bold(),
        AlarmState::Armed => text.green(),
        AlarmState::Stopping => text.yellow(),
        AlarmState::Idle => text.normal(),
    }
}

fn print_summary(timeline: &[TimelineEntry]) {
    for endpoint in ["wearable", "companion"] {
        let fired = timeline.iter().find(|e| {
            matches!(
                e.event,
                TimelineEvent::Transition {
                    endpoint: name,
                    to: AlarmState::Triggered,
                    ..
                } if name == endpoint
            )
        });
        match fired {
            Some(entry) => println!(
                "{} {endpoint} fired at {:.1}s",
                "Summary:".bold(),
                entry.seconds
            ),
            None => println!("{} {endpoint} never fired", "Summary:".bold()),
        }
    }
}
