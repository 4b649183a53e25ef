use std::{sync::Arc, time::SystemTime};

use color_eyre::Result;
use eyre::eyre;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use light_dash::{
    auth::{
        identity_toolkit::{start_token_refresh_loop, IdentityToolkitAuth},
        AuthProvider,
    },
    device::{ControllerEvent, LightController},
    protocols::https::mk_hyper_https_client,
    settings::{read_settings, Settings},
    store::{rtdb::RtdbStore, SharedStore},
    telemetry::{TelemetryReader, TelemetryStatus, TimeRange},
};

enum Command {
    On,
    Off,
    Brightness(u8),
    Release,
    Auto(bool),
    Power(TimeRange),
    State,
    SignOut,
    Quit,
}

fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let arg = words.next();

    let command = match (command, arg) {
        ("on", None) => Command::On,
        ("off", None) => Command::Off,
        ("brightness", Some(value)) => Command::Brightness(value.parse()?),
        ("release", None) => Command::Release,
        ("auto", Some("on")) => Command::Auto(true),
        ("auto", Some("off")) => Command::Auto(false),
        ("power", None) => Command::Power(TimeRange::Day),
        ("power", Some(range)) => {
            Command::Power(TimeRange::parse(range).ok_or_else(|| eyre!("Unknown range {range}"))?)
        }
        ("state", None) => Command::State,
        ("signout", None) => Command::SignOut,
        ("quit" | "exit", None) => Command::Quit,
        _ => return Err(eyre!("Unknown command: {line}")),
    };

    Ok(command)
}

async fn sign_in(settings: &Settings, auth: &IdentityToolkitAuth) -> Result<String> {
    let email = settings
        .account
        .email
        .as_deref()
        .ok_or_else(|| eyre!("account.email is not configured"))?;
    let password = settings
        .account
        .password
        .as_deref()
        .ok_or_else(|| eyre!("account.password is not configured"))?;

    let user = if settings.account.register {
        auth.sign_up(email, password).await?
    } else {
        auth.sign_in(email, password).await?
    };

    Ok(user.email)
}

fn print_state(controller: &LightController) {
    let view = controller.view();
    let state = &view.state;

    println!(
        "powered: {}, brightness: {}% (slider {}%), pwm: {}, auto: {}, motion: {}, ambient: {}{}",
        state.powered,
        state.brightness,
        view.preview_brightness,
        state.pwm_value,
        state.auto_mode,
        state.motion_detected,
        state.ambient_light,
        if view.busy { " [saving]" } else { "" },
    );

    if let Some(error) = &view.error {
        println!("last error: {error}");
    }
}

async fn print_power(reader: &TelemetryReader, range: TimeRange) {
    let view = reader.recent(range, SystemTime::now()).await;

    match &view.status {
        TelemetryStatus::Loaded => {}
        TelemetryStatus::NoData => {
            println!("No power usage recorded in this range");
            return;
        }
        TelemetryStatus::Unavailable(e) => {
            println!("Power usage unavailable: {e}");
            return;
        }
    }

    println!("{} samples", view.samples.len());

    if let Some(latest) = view.samples.last() {
        println!(
            "latest: {:.2} W at {}% brightness",
            latest.instant_power, latest.brightness
        );
    }

    if let Some(breakdown) = &view.breakdown {
        println!(
            "led strip: {:.2} W, system: {:.2} W, buzzer: {:.2} W, regulator loss: {:.2} W",
            breakdown.led_strip, breakdown.system_base, breakdown.buzzer, breakdown.regulator_loss
        );
    }

    if let Some(summary) = &view.summary {
        println!(
            "energy: {:.2} Wh, projected monthly cost: {:.0}",
            summary.total_wh, summary.monthly_cost
        );
    }
}

// Returns false when the console should exit
async fn run_command(
    command: Command,
    controller: &mut LightController,
    telemetry: &TelemetryReader,
    auth: &IdentityToolkitAuth,
) -> Result<bool> {
    match command {
        Command::On => {
            controller.turn_on()?;
        }
        Command::Off => {
            controller.turn_off()?;
        }
        Command::Brightness(value) => {
            controller.slider_press(value)?;
        }
        Command::Release => {
            controller.global_release()?;
        }
        Command::Auto(auto_mode) => {
            controller.set_auto_mode(auto_mode)?;
        }
        Command::Power(range) => print_power(telemetry, range).await,
        Command::State => print_state(controller),
        Command::SignOut => {
            controller.stop();
            auth.sign_out().await?;
            return Ok(false);
        }
        Command::Quit => return Ok(false),
    }

    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    pretty_env_logger::init();

    let settings = read_settings()?;
    let https_client = mk_hyper_https_client(&settings.firebase)?;

    let auth = Arc::new(IdentityToolkitAuth::new(&settings.firebase, &https_client));
    let email = sign_in(&settings, &auth).await?;
    start_token_refresh_loop(&auth);

    let store: SharedStore = Arc::new(RtdbStore::new(
        &settings.firebase.database_url,
        &https_client,
        auth.observe_session(),
    ));

    let telemetry = TelemetryReader::new(store.clone(), &settings.telemetry);
    let mut controller = LightController::from_settings(store, &settings, &format!("dashboard:{email}"));
    controller.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }

                let result = match parse_command(&line) {
                    Ok(command) => run_command(command, &mut controller, &telemetry, &auth).await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => warn!("{e}"),
                }
            }
            event = controller.next_event() => {
                match event {
                    Some(ControllerEvent::StateChanged) => {
                        info!("Device state: {:?}", controller.state());
                    }
                    Some(ControllerEvent::SubscriptionClosed) => {
                        error!("Lost the device state subscription, the controller will resubscribe");
                    }
                    None => break,
                    Some(event) => info!("{event:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    controller.stop();

    Ok(())
}
