use super::{connect, load_config, Connection};
use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use soundscan_core::dispatcher::Dispatcher;
use std::path::Path;
use std::time::Duration;

/// How long `status` waits for the telemetry reply.
const STATUS_WAIT: Duration = Duration::from_secs(2);

#[derive(Subcommand)]
pub enum ControlSubcommand {
    /// Raise the head
    HeadUp,
    /// Lower the head until the given pressure is reached
    HeadDown {
        #[arg(long)]
        pressure: i64,
    },
    /// Energise the motors
    MotorOn,
    /// Release the motors
    MotorOff,
    /// Request a telemetry frame and print it
    Status,
    /// Send the base home
    ReturnBase,
    /// Strike the current blade
    Ding,
    /// Pull the current blade into position
    PullBlade,
}

pub fn run(
    root: &Path,
    subcmd: ControlSubcommand,
    conn: &Connection,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let (link, mut telemetry) = connect(root, &config, conn).await?;
        let dispatcher = Dispatcher::new(link.clone());

        let acked = match subcmd {
            ControlSubcommand::HeadUp => dispatcher.move_head_up().await,
            ControlSubcommand::HeadDown { pressure } => dispatcher.move_head_down(pressure).await,
            ControlSubcommand::MotorOn => dispatcher.set_motor_on(true).await,
            ControlSubcommand::MotorOff => dispatcher.set_motor_on(false).await,
            ControlSubcommand::Status => {
                telemetry.drain();
                dispatcher.status().await
            }
            ControlSubcommand::ReturnBase => dispatcher.return_base().await,
            ControlSubcommand::Ding => dispatcher.ding().await,
            ControlSubcommand::PullBlade => dispatcher.pull_blade().await,
        };
        let acked = match acked {
            Ok(acked) => acked,
            Err(e) => {
                link.close();
                return Err(e).context("command failed");
            }
        };

        let frame = if acked.command == "status" {
            tokio::time::timeout(STATUS_WAIT, telemetry.recv())
                .await
                .ok()
                .flatten()
        } else {
            None
        };
        link.close();

        if json {
            print_json(&serde_json::json!({
                "command": acked.command,
                "attempts": acked.attempts,
                "telemetry": frame,
            }))?;
        } else {
            println!("{} acknowledged after {} attempt(s)", acked.command, acked.attempts);
            match frame {
                Some(frame) => print!("{}", serde_yaml::to_string(&frame)?),
                None if acked.command == "status" => println!("no telemetry within {STATUS_WAIT:?}"),
                None => {}
            }
        }
        anyhow::Ok(())
    })
}
