use super::*;

fn fields(entries: &[(&str, Value)]) -> FieldMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), ValueSource::Constant(v.clone())))
        .collect()
}

#[test]
fn test_type_names() {
    assert_eq!(NodeType::from_name("Sequence"), Some(NodeType::Sequence));
    assert_eq!(
        NodeType::from_name("NavigateTo"),
        Some(NodeType::Remote(RemoteOp::NavigateTo))
    );
    assert_eq!(NodeType::from_name("Fallback"), None);
    assert_eq!(NodeType::Remote(RemoteOp::Power).to_string(), "PowerCommand");
}

#[test]
fn test_configure_retry() {
    let kind = NodeType::Retry
        .configure(&fields(&[("max_attempts", Value::from("3"))]))
        .unwrap();
    assert_eq!(kind, NodeKind::Retry { max_attempts: 3 });

    assert_eq!(
        NodeType::Retry.configure(&FieldMap::new()),
        Err(BindingError::MissingField("max_attempts".to_owned()))
    );
    assert_eq!(
        NodeType::Retry.configure(&fields(&[("max_attempts", Value::Bool(true))])),
        Err(BindingError::TypeMismatch {
            field: "max_attempts".to_owned(),
            expected: ValueType::Int,
            found: ValueType::Bool,
        })
    );
}

#[test]
fn test_configure_remote_defaults() {
    let kind = NodeType::Remote(RemoteOp::NavigateTo)
        .configure(&fields(&[
            ("destination_waypoint_id", Value::from("wp-7")),
            ("timeout", Value::Int(5)),
        ]))
        .unwrap();
    let NodeKind::Remote(remote) = kind else {
        panic!("expected a remote node");
    };
    assert_eq!(remote.service, "graph-nav");
    assert_eq!(remote.leases, vec!["body".to_owned()]);
    assert_eq!(remote.timeout, Some(Duration::from_secs(5)));
    assert_eq!(
        remote.request.get("destination_waypoint_id"),
        Some(&serde_json::Value::from("wp-7"))
    );
}

#[test]
fn test_remote_grpc_requires_service() {
    assert_eq!(
        NodeType::Remote(RemoteOp::Grpc).configure(&FieldMap::new()),
        Err(BindingError::MissingField("service".to_owned()))
    );
    let spec = NodeType::Remote(RemoteOp::Grpc).field("service").unwrap();
    assert!(spec.required);
}

#[test]
fn test_arity() {
    assert!(NodeType::ForDuration.arity().accepts(1));
    assert!(NodeType::ForDuration.arity().accepts(2));
    assert!(!NodeType::SimpleParallel.arity().accepts(1));
    assert!(NodeType::Sequence.arity().accepts(0));
}

#[test]
fn test_remote_fields() {
    let ops = [
        (RemoteOp::Grpc, "input"),
        (RemoteOp::NavigateTo, "travel_speed"),
        (RemoteOp::NavigateRoute, "waypoint_ids"),
        (RemoteOp::Localize, "waypoint_id"),
        (RemoteOp::RobotCommand, "params"),
        (RemoteOp::Dock, "docking_station_id"),
        (RemoteOp::Power, "request"),
        (RemoteOp::DataAcquisition, "capabilities"),
        (RemoteOp::Prompt, "options"),
        (RemoteOp::Ptz, "zoom"),
    ];
    for (op, own) in ops {
        let ty = NodeType::Remote(op);
        for common in ["service", "host", "timeout", "leases"] {
            assert!(ty.field(common).is_some(), "{ty} lacks {common}");
        }
        assert!(ty.field(own).is_some(), "{ty} lacks {own}");
    }
    let dock = NodeType::Remote(RemoteOp::Dock)
        .field("docking_station_id")
        .unwrap();
    assert_eq!(dock.ty, FieldType::Value(ValueType::Int));
    assert!(dock.required);
    assert!(!NodeType::Remote(RemoteOp::Dock).field("service").unwrap().required);
}
