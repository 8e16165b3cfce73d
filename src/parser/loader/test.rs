use super::*;
use crate::parser::parse_mission;

fn load_str(source: &str) -> Result<Tree, LoadError> {
    load(&parse_mission(source)?)
}

#[test]
fn test_subtree() {
    let tree = load_str(
        r#"
tree main = Sequence {
    sub
}

tree sub = Selector {
    ConstantResult (result <- "success")
}
    "#,
    )
    .unwrap();

    let main = tree.node(tree.main()).unwrap();
    assert_eq!(main.id(), Some("main"));
    let call = tree.node(main.children()[0]).unwrap();
    assert_eq!(
        call.kind(),
        Some(&NodeKind::Reference {
            target: "sub".to_owned()
        })
    );
    let sub = tree.node(tree.lookup("sub").unwrap()).unwrap();
    assert_eq!(sub.node_type(), NodeType::Selector);
}

#[test]
fn test_missing_main() {
    assert!(matches!(
        load_str("tree sub = Sequence"),
        Err(LoadError::MissingTree)
    ));
}

#[test]
fn test_duplicate_tree() {
    assert!(matches!(
        load_str("tree main = Sequence\ntree main = Selector"),
        Err(LoadError::DuplicateTree(name)) if name == "main"
    ));
}

#[test]
fn test_recursion() {
    let tree = r#"
tree main = Sequence {
    sub
}

tree sub = Sequence {
    sub2
}

tree sub2 = Selector {
    sub
}
    "#;
    assert!(matches!(
        load_str(tree),
        Err(LoadError::InfiniteRecursion { node }) if node == "sub"
    ));
}

#[test]
fn test_shared_subtree_is_not_recursion() {
    let tree = r#"
tree main = Sequence {
    leaf
    branch
    leaf
}

tree branch = Selector {
    leaf
}

tree leaf = Sleep (seconds <- 0)
    "#;
    let tree = load_str(tree).unwrap();
    // Each tree definition is stored once no matter how often it is used.
    assert_eq!(tree.len(), 7);
}

#[test]
fn test_unknown_node() {
    assert!(matches!(
        load_str("tree main = Fallback"),
        Err(LoadError::MissingNode(name)) if name == "Fallback"
    ));
}

#[test]
fn test_field_checks() {
    assert!(matches!(
        load_str("tree main = Retry (max_attempts <- 2, bogus <- 1) { Sequence }"),
        Err(LoadError::UnknownField { field, .. }) if field == "bogus"
    ));
    assert!(matches!(
        load_str("tree main = Retry { Sequence }"),
        Err(LoadError::MissingField { field, .. }) if field == "max_attempts"
    ));
    assert!(matches!(
        load_str("tree main = Retry (max_attempts <- \"many\") { Sequence }"),
        Err(LoadError::InvalidLiteral { expected: ValueType::Int, .. })
    ));
    assert!(matches!(
        load_str(r#"tree main = Condition (lhs <- 1, rhs <- 2, operation <- "<>")"#),
        Err(LoadError::Invalid { .. })
    ));
}

#[test]
fn test_child_count() {
    assert!(matches!(
        load_str("tree main = SimpleParallel { Sequence }"),
        Err(LoadError::ChildCount { found: 1, .. })
    ));
    assert!(matches!(
        load_str("tree main = Sleep (seconds <- 1) { Sequence }"),
        Err(LoadError::ChildCount { found: 1, .. })
    ));
}

#[test]
fn test_outputs() {
    assert!(matches!(
        load_str("tree main = Retry (max_attempts <- 2, tries -> t) { Sequence }"),
        Err(LoadError::UnknownOutput { port, .. }) if port == "tries"
    ));
    let tree = load_str("tree main = Retry (max_attempts <- 2, attempt -> t) { Sequence }").unwrap();
    assert_eq!(tree.node(tree.main()).unwrap().output("attempt"), Some("t"));
}

#[test]
fn test_overrides() {
    let tree = load_str("tree main = Retry (max_attempts <- limit) { Sequence }").unwrap();
    let retry = tree.node(tree.main()).unwrap();
    assert_eq!(retry.kind(), None);
    assert_eq!(
        retry.overrides(),
        &[Override {
            field: "max_attempts".to_owned(),
            source: ValueSource::Variable("limit".to_owned()),
        }]
    );

    assert!(matches!(
        load_str("tree main = NavigateTo (destination_waypoint_id <- \"a\", leases <- which)"),
        Err(LoadError::StaticField { field, .. }) if field == "leases"
    ));
}

#[test]
fn test_parameters() {
    let tree = r#"
tree main = Sequence {
    go(target <- "dock")
    go(target <- next_stop, speed <- 1)
}

tree go(target: string, speed: float = 0.5) = NavigateTo (
    destination_waypoint_id <- $target
    travel_speed <- $speed
)
    "#;
    let tree = load_str(tree).unwrap();
    let go = tree.node(tree.lookup("go").unwrap()).unwrap();
    assert_eq!(go.parameters()[1].default, Some(Value::Float(0.5)));
    assert_eq!(go.parameters()[0].ty, ValueType::String);
    assert_eq!(
        tree.lease_resources().into_iter().collect::<Vec<_>>(),
        vec!["body".to_owned()]
    );

    assert!(matches!(
        load_str("tree main = go\ntree go(target: string) = Sequence"),
        Err(LoadError::MissingParameter { parameter, .. }) if parameter == "target"
    ));
    assert!(matches!(
        load_str("tree main = go(speed <- 1)\ntree go = Sequence"),
        Err(LoadError::UnknownParameter { parameter, .. }) if parameter == "speed"
    ));
    assert!(matches!(
        load_str("tree main = Sleep (seconds <- $delay)"),
        Err(LoadError::UndeclaredParameter { parameter, .. }) if parameter == "delay"
    ));
    assert!(matches!(
        load_str("tree main = Sequence\ntree go(target: waypoint) = Sequence"),
        Err(LoadError::UnknownParameterType { ty, .. }) if ty == "waypoint"
    ));
}

#[test]
fn test_define_blackboard_assignments() {
    let tree = load_str(
        "tree main = DefineBlackboard (count <- 0, label <- \"x\") { SetBlackboard (count <- 1) }",
    )
    .unwrap();
    let define = tree.node(tree.main()).unwrap();
    assert_eq!(
        define.assignments,
        vec![
            ("count".to_owned(), ValueSource::Constant(Value::Int(0))),
            ("label".to_owned(), ValueSource::Constant(Value::from("x"))),
        ]
    );
}
