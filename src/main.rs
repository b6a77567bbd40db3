use modbus_slaves::config::{FileType, SupervisorConfig};
use modbus_slaves::mem::Bank;
use modbus_slaves::msg::{Level, LogMsg, LogSink, Logger};
use modbus_slaves::supervisor::Supervisor;
use modbus_slaves::util::Expect;

use clap::Parser;
use std::sync::Arc;
use tokio::runtime::Builder;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON or TOML configuration file providing the slave definitions.
    #[arg(long)]
    config: String,

    /// Switch on verbose output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Write the loaded configuration to the given path and exit.
    #[arg(long)]
    export: Option<String>,

    /// Format of the exported configuration.
    #[arg(long, value_enum, default_value_t = FileType::Toml)]
    format: FileType,
}

fn main() {
    let args = Args::parse();

    let config = SupervisorConfig::read(&args.config)
        .panic(|e| format!("Failed to read configuration file. [{}]", e));
    if let Some(path) = args.export {
        config
            .write(&path, args.format)
            .panic(|e| format!("Failed to write configuration file. [{}]", e));
        return;
    }

    // Info messages are only printed in verbose mode
    let verbose = args.verbose;
    let sink: Arc<dyn LogSink> = Arc::new(move |msg: LogMsg| {
        if verbose || msg.level != Level::Info {
            println!("{}", msg);
        }
    });
    let log = Logger::new("main", sink.clone());
    let changes = log.clone();
    let listener = move |bank: Bank, address: u16, value: u16| {
        changes.info(&format!("{} {} = {:#06X}", bank, address, value));
    };
    let supervisor = Supervisor::new(sink, Arc::new(listener));

    for slave in config.slaves {
        let id = slave.slave_id.clone();
        if let Err(e) = supervisor.add(slave) {
            log.err(&format!("Skipping slave {}: {}", id, e));
        }
    }
    if supervisor.is_empty() {
        log.warn("No slaves configured");
        return;
    }
    let failed = supervisor.start_all();
    log.info(&format!(
        "Started {} of {} slaves",
        supervisor.len() - failed.len(),
        supervisor.len()
    ));

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .panic(|e| format!("Failed to create runtime. [{}]", e));
    runtime
        .block_on(tokio::signal::ctrl_c())
        .panic(|e| format!("Failed to wait for Ctrl-C. [{}]", e));

    log.info("Shutting down");
    for (id, e) in supervisor.stop_all() {
        log.err(&format!("Slave {} did not stop cleanly: {}", id, e));
    }
    log.ok("All slaves stopped");
}
