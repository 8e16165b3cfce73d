//! Loads a mission file and runs it with every remote service simulated.
//!
//! ```text
//! cargo run --example from_file -- demos/patrol.tree [config.yaml]
//! ```
//!
//! Files ending in `.yaml` or `.yml` are read in the YAML tree format,
//! anything else in the tree DSL.

use mission_tree_lite::{
    node::{NodeKind, NodeType}, LocalLeaseProvider, MissionConfig, MissionRunner, RemoteClient,
    ThreadedService, Value,
};
use std::collections::BTreeSet;
use std::fs;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "demos/patrol.tree".to_owned());
    let config = match args.next() {
        Some(config) => MissionConfig::from_yaml(&fs::read_to_string(config)?)?,
        None => MissionConfig::default(),
    };
    let source = fs::read_to_string(&path)?;
    let tree = if path.ends_with(".yaml") || path.ends_with(".yml") {
        mission_tree_lite::load_yaml(&source)?
    } else {
        mission_tree_lite::load_str(&source)?
    };

    let services: BTreeSet<String> = tree
        .nodes()
        .filter_map(|(_, node)| match (node.kind(), node.node_type()) {
            (Some(NodeKind::Remote(remote)), _) => Some(remote.service.clone()),
            (_, NodeType::Remote(op)) => Some(op.default_service().to_owned()),
            _ => None,
        })
        .filter(|service| !service.is_empty())
        .collect();
    let mut remote = RemoteClient::new();
    for service in services {
        remote.register(
            service,
            ThreadedService::new(|request, _| {
                std::thread::sleep(std::time::Duration::from_millis(300));
                Ok(Value::from(serde_json::Value::Object(request.fields.clone())))
            }),
        );
    }

    let mut runner = MissionRunner::new(config, remote, LocalLeaseProvider::new());
    runner.load(tree);
    let result = runner.run()?;

    let feedback = runner.feedback();
    for report in &feedback.reports {
        eprintln!("{} failed at {:?}: {}", report.label, report.at, report.error);
    }
    eprintln!("result: {result} after {} ticks", feedback.ticks);

    Ok(())
}
