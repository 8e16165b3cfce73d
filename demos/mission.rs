//! Runs a small inspection mission against simulated robot services.
//!
//! ```text
//! RUST_LOG=info cargo run --example mission
//! ```

use mission_tree_lite::{
    BehaviorResult, LocalLeaseProvider, MissionConfig, MissionRunner, RemoteClient,
    ThreadedService, Value,
};
use std::time::Duration;

const MISSION: &str = r#"
tree main = Sequence {
    DefineBlackboard (stop <- "") {
        Sequence {
            inspect (stop <- "tank-1")
            inspect (stop <- "tank-2")
            Dock (docking_station_id <- 520)
        }
    }
}

tree inspect(stop: string) = Sequence {
    Retry (max_attempts <- 2) {
        NavigateTo "drive" (destination_waypoint_id <- $stop, feedback -> progress)
    }
    DataAcquisition "capture" (action_name <- $stop)
    SetBlackboard (stop <- $stop)
    FormatBlackboard (key <- "log", format <- "inspected {stop} at {battery:.0f}%")
}
"#;

/// Pretends to work for `steps` tenths of a second, reporting progress.
fn simulated(steps: u32) -> ThreadedService {
    ThreadedService::new(move |request, progress| {
        for step in 0..steps {
            if progress.is_cancelled() {
                return Err("cancelled".to_owned());
            }
            progress.feedback(Value::from(format!("{}/{steps}", step + 1)));
            std::thread::sleep(Duration::from_millis(100));
        }
        Ok(Value::from(format!("{} done", request.node)))
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let remote = RemoteClient::new()
        .with_service("graph-nav", simulated(5))
        .with_service("data-acquisition", simulated(2))
        .with_service("docking", simulated(3));
    let config = MissionConfig {
        name: "inspection".to_owned(),
        ..MissionConfig::default()
    };
    let mut runner = MissionRunner::new(config, remote, LocalLeaseProvider::new());
    runner.define("battery", 87.5)?;
    runner.define("log", "")?;
    runner.load_str(MISSION)?;
    runner.play()?;

    loop {
        let result = runner.tick()?;
        let feedback = runner.feedback();
        if let Some(active) = &feedback.active {
            println!("[{:>5.1}s] {}", feedback.elapsed.as_secs_f64(), active.label);
        }
        if result != BehaviorResult::Running {
            let root = runner.blackboard().root();
            println!("result: {result}");
            println!("log: {:?}", runner.blackboard().get(root, "log"));
            break;
        }
        std::thread::sleep(runner.config().tick_period);
    }

    Ok(())
}
