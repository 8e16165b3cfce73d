use super::*;

fn lookup(path: &str) -> Result<Value, BlackboardError> {
    match path {
        "x" => Ok(Value::Float(3.14159)),
        "n" => Ok(Value::Int(7)),
        "name" => Ok(Value::from("spot")),
        "state.charge" => Ok(Value::Float(55.0)),
        _ => Err(BlackboardError::NotFound(path.to_owned())),
    }
}

#[test]
fn test_parse_template() {
    assert_eq!(
        parse_template("a{x:.2f}b{{"),
        Ok(vec![
            Piece::Text("a"),
            Piece::Var {
                path: "x",
                precision: Some(2)
            },
            Piece::Text("b"),
            Piece::Text("{"),
        ])
    );
    assert_eq!(
        parse_template("{state.charge}"),
        Ok(vec![Piece::Var {
            path: "state.charge",
            precision: None
        }])
    );
    assert!(parse_template("{unterminated").is_err());
    assert!(parse_template("{x:.f}").is_err());
}

#[test]
fn test_render_fixed_point() {
    assert_eq!(render("{x:.2f}", lookup), Ok("3.14".to_owned()));
    assert_eq!(render("{n:.1f}", lookup), Ok("7.0".to_owned()));
    assert_eq!(
        render("{name} at {state.charge:.0f}%", lookup),
        Ok("spot at 55%".to_owned())
    );
}

#[test]
fn test_render_fails_atomically() {
    assert_eq!(
        render("x={x:.2f} y={y}", lookup),
        Err(BlackboardError::NotFound("y".to_owned()))
    );
    assert!(matches!(
        render("{name:.2f}", lookup),
        Err(BlackboardError::TypeMismatch { .. })
    ));
}
