use anyhow::Context;
use embassy_executor::Spawner;
use env_logger::Env;
use kiosk_rs::console::{self, CommandChannel};
use kiosk_rs::controller::KioskController;
use kiosk_rs::system::FileStore;
use log::{error, info};

static COMMANDS: CommandChannel = CommandChannel::new();

const DEFAULT_SETTINGS_PATH: &str = "kiosk-settings.json";

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let env = Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    info!("Starting Coffee Kiosk Controller");

    let mut controller = match create_controller() {
        Ok(controller) => controller,
        Err(e) => {
            error!("Failed to create controller: {:?}", e);
            return;
        }
    };

    if let Err(e) = console::spawn_stdin_reader(&COMMANDS) {
        error!("Failed to start console reader: {:?}", e);
        return;
    }

    info!("Controller created successfully, starting...");
    controller.run(&COMMANDS).await;
    info!("Kiosk stopped");
    std::process::exit(0);
}

// Boxed so the main task future stays small.
fn create_controller() -> anyhow::Result<Box<KioskController<FileStore>>> {
    let path = std::env::var("KIOSK_SETTINGS").unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string());
    let store = FileStore::open(&path)
        .with_context(|| format!("opening settings store at {}", path))?;
    info!("Settings store: {}", store.path().display());
    Ok(Box::new(KioskController::new(store)))
}
