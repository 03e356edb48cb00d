//! Command-line interface for fitalarm.
//!
//! Controls and monitors a running `fitalarmd` through its HTTP API.

use std::env;

use anyhow::{Context, Result, bail};

use fitalarm::api_client::{self, types::AlarmView};

fn usage() -> ! {
    eprintln!("Usage: fitalarm-cli <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status               Show alarm status");
    eprintln!("  arm <bpm> [HH:MM]    Arm with a heart rate threshold and optional time");
    eprintln!("  disarm               Disarm the alarm");
    eprintln!("  stop                 Stop a ringing alarm");
    eprintln!("  sample <bpm>         Push one heart rate sample");
    eprintln!();
    eprintln!("Environment:");
    eprintln!(
        "  FITALARM_API_URL    API base URL (default: {})",
        api_client::DEFAULT_BASE_URL
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        usage();
    };
    let client = make_client();

    match (command.as_str(), &args[1..]) {
        ("status", []) => print_alarm(&client.get_alarm().await?),
        ("arm", [bpm]) => print_alarm(&client.arm(parse_bpm(bpm)?, None).await?),
        ("arm", [bpm, at]) => print_alarm(&client.arm(parse_bpm(bpm)?, Some(at.clone())).await?),
        ("disarm", []) => print_alarm(&client.disarm().await?),
        ("stop", []) => print_alarm(&client.stop().await?),
        ("sample", [bpm]) => {
            let value: f64 = bpm
                .parse()
                .with_context(|| format!("invalid sample {bpm:?}"))?;
            client.push_sample(value).await?;
            println!("Sample {value} queued");
        }
        _ => {
            eprintln!("Unknown command or wrong arguments: {}", args.join(" "));
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring FITALARM_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("FITALARM_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

fn parse_bpm(text: &str) -> Result<u32> {
    match text.parse::<u32>() {
        Ok(0) => bail!("threshold must be positive"),
        Ok(bpm) => Ok(bpm),
        Err(e) => Err(e).with_context(|| format!("invalid threshold {text:?}")),
    }
}

fn print_alarm(alarm: &AlarmView) {
    println!("Endpoint:  {}", alarm.name);
    match &alarm.cause {
        Some(cause) => println!("State:     {} ({cause})", alarm.state),
        None => println!("State:     {}", alarm.state),
    }
    match alarm.bpm_threshold {
        Some(bpm) => println!("Threshold: {bpm} bpm"),
        None => println!("Threshold: (not set)"),
    }
    if let Some(at) = &alarm.scheduled_time {
        println!("Scheduled: {at}");
    }
    match alarm.average_bpm {
        Some(avg) => println!(
            "Heart rate: {avg:.1} bpm over {} samples ({})",
            alarm.sample_count, alarm.sensor
        ),
        None => println!("Heart rate: no reading ({})", alarm.sensor),
    }
    println!(
        "Peer:      {} ({})",
        if alarm.session.reachable {
            "reachable"
        } else {
            "unreachable"
        },
        alarm.session.activation_state
    );
    if let Some(outcome) = &alarm.last_send {
        println!("Last send: {outcome}");
    }
}
