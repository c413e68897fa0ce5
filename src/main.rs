//! talk-core: push-to-talk voice conversation client.
//!
//! Communicates with the front-end via JSON-line IPC on stdin/stdout.
//! Bootstraps the session, waits for persona selection and the start
//! action, then hands input over to the conversation orchestrator.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use talk_core::audio::capture::list_devices;
use talk_core::audio::{CpalMicrophone, RodioPlayer};
use talk_core::capabilities::Capabilities;
use talk_core::config::paths::{get_data_dir, get_log_dir};
use talk_core::config::{read_talk_config, FilePersonaStore};
use talk_core::error::TalkError;
use talk_core::input::hotkey::HotkeyListener;
use talk_core::input::{InputBinding, InputEvent};
use talk_core::ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use talk_core::ipc::{IpcPresenter, TalkCommand, TalkEvent};
use talk_core::logger;
use talk_core::orchestrator::{Orchestrator, TurnCommand};
use talk_core::service::HttpTurnService;
use talk_core::session::{BootPhase, ReadySession, SessionBootstrap};

type Boot<'a> = SessionBootstrap<
    'a,
    CpalMicrophone,
    HttpTurnService,
    RodioPlayer,
    IpcPresenter,
    FilePersonaStore,
>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logger::init(&get_log_dir()) {
        eprintln!("File logging disabled: {e:#}");
    }

    // Emit starting event immediately so the front-end knows we're alive.
    emit_event(&TalkEvent::Starting {});

    emit_loading("Reading configuration...");
    let config = read_talk_config();
    info!(?config, "Configuration loaded");
    debug!(inputs = ?list_devices(), "Capture devices");

    let mut commands = spawn_stdin_reader();

    let client = reqwest::Client::new();
    let service = match HttpTurnService::new(
        client.clone(),
        config.server_url(),
        config.poll_endpoint(),
    ) {
        Ok(service) => service,
        Err(e) => {
            emit_error(&e.to_string());
            return Err(e.into());
        }
    };
    let origin = service.base_url().clone();

    let caps = Capabilities {
        microphone: CpalMicrophone::new(config.input_device.clone(), config.max_utterance_secs()),
        service,
        player: RodioPlayer::new(client, config.output_device.clone(), config.volume()),
        presenter: IpcPresenter,
    };

    let session = {
        let store = FilePersonaStore::new(&get_data_dir());
        let mut boot = Boot::new(&caps, store, config.boot_policy());

        if let Err(e) = boot
            .prepare(&origin, |step| emit_loading(&step.to_string()))
            .await
        {
            report_boot_failure(boot.phase(), &e);
            wait_for_stop(&mut commands).await;
            emit_event(&TalkEvent::Stopping {});
            return Ok(());
        }

        emit_personas(&boot);
        match await_start(&mut boot, &mut commands).await {
            Some(session) => session,
            None => {
                emit_event(&TalkEvent::Stopping {});
                return Ok(());
            }
        }
    };

    emit_event(&TalkEvent::Ready {
        sid: session.stage.stage_id.clone(),
        persona: session.persona.clone(),
    });

    let orchestrator = Orchestrator::new(caps, session, config.turn_policy());
    let binding = InputBinding::new(config.ptt_keys()).with_phase(orchestrator.phase_cell());

    let (input_tx, input_rx) = mpsc::channel(32);
    let hotkey = config.global_hotkey.as_deref().map(HotkeyListener::new);
    if let Some(listener) = &hotkey {
        listener.start(input_tx.clone());
    }
    drop(input_tx);

    let (turn_tx, turn_rx) = mpsc::channel(32);
    tokio::spawn(forward_inputs(commands, input_rx, binding, turn_tx));

    // The capture stream is not Send, so the orchestrator stays on this task.
    orchestrator.run(turn_rx).await;

    if let Some(listener) = &hotkey {
        listener.stop();
    }
    emit_event(&TalkEvent::Stopping {});
    info!("Talk core shutting down");
    Ok(())
}

fn emit_loading(step: &str) {
    emit_event(&TalkEvent::Loading {
        step: step.to_string(),
    });
}

fn emit_personas(boot: &Boot<'_>) {
    emit_event(&TalkEvent::Personas {
        personas: boot.personas().to_vec(),
        selected: boot.preview().map(|p| p.id.clone()),
    });
    if boot.phase() == BootPhase::AwaitingStart {
        emit_event(&TalkEvent::AwaitingStart {});
    }
}

fn report_boot_failure(phase: BootPhase, err: &TalkError) {
    let message = err.to_string();
    warn!(%phase, error = %message, "Bootstrap failed");
    let event = match phase {
        BootPhase::Blocked => TalkEvent::Blocked { reason: message },
        BootPhase::PermissionDenied => TalkEvent::PermissionDenied { message },
        BootPhase::StageUnavailable => TalkEvent::StageError { message },
        _ => TalkEvent::Error { message },
    };
    emit_event(&event);
}

/// Bootstrap failures are not retried; keep answering pings until the
/// front-end stops us or goes away.
async fn wait_for_stop(commands: &mut mpsc::UnboundedReceiver<TalkCommand>) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            TalkCommand::Ping {} => emit_event(&TalkEvent::Pong {}),
            TalkCommand::Stop {} => break,
            other => debug!(command = ?other, "Ignored, session failed"),
        }
    }
}

/// Persona selection until the start action. `None` means stop.
async fn await_start(
    boot: &mut Boot<'_>,
    commands: &mut mpsc::UnboundedReceiver<TalkCommand>,
) -> Option<ReadySession> {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            TalkCommand::SelectPersona { id } => match boot.select_persona(&id) {
                Ok(persona) => {
                    emit_event(&TalkEvent::PersonaSelected {
                        persona: persona.cloned(),
                    });
                    if boot.phase() == BootPhase::AwaitingStart {
                        emit_event(&TalkEvent::AwaitingStart {});
                    }
                }
                Err(e) => emit_error(&e.to_string()),
            },
            TalkCommand::ListPersonas {} => emit_personas(boot),
            TalkCommand::StartStage {} => match boot.start_stage().await {
                Ok(session) => return Some(session),
                Err(e) => emit_error(&e.to_string()),
            },
            TalkCommand::Ping {} => emit_event(&TalkEvent::Pong {}),
            TalkCommand::Stop {} => return None,
            other => debug!(command = ?other, "Ignored before the conversation starts"),
        }
    }
    info!("stdin closed before the conversation started");
    None
}

/// Turn IPC and hotkey input into orchestrator commands until `stop` or
/// stdin closes.
async fn forward_inputs(
    mut commands: mpsc::UnboundedReceiver<TalkCommand>,
    mut hotkeys: mpsc::Receiver<InputEvent>,
    binding: InputBinding,
    turns: mpsc::Sender<TurnCommand>,
) {
    loop {
        let event = tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(TalkCommand::Ping {}) => {
                    emit_event(&TalkEvent::Pong {});
                    continue;
                }
                Some(TalkCommand::Stop {}) | None => break,
                Some(cmd) => match cmd.input_event() {
                    Some(event) => event,
                    None => {
                        emit_error(&format!("{cmd:?} not allowed once the conversation has started"));
                        continue;
                    }
                },
            },
            Some(event) = hotkeys.recv() => event,
        };

        if let Some(turn) = binding.translate(&event) {
            if turns.send(turn).await.is_err() {
                return;
            }
        }
    }
    let _ = turns.send(TurnCommand::Shutdown).await;
}
