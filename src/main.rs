use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rfid_inventory_gateway::config::GatewaySettings;
use rfid_inventory_gateway::pipeline;

fn main() -> ExitCode {
    // 日志写 stderr，stdout 留给行协议
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("RFID inventory gateway booting...");

    let settings = match GatewaySettings::load() {
        Ok(settings) => settings,
        Err(err) => {
            log::error!("Config load failed: {}", err);
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C 与输入 EOF 共用同一个关闭信号
    let shutdown = Arc::new(AtomicBool::new(false));
    let signal = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::info!("Shutdown signal received");
        signal.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Signal handler install failed: {:?}", err);
    }

    pipeline::run(settings, io::BufReader::new(io::stdin()), io::stdout(), shutdown);
    ExitCode::SUCCESS
}
