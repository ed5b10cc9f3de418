mod common;

use common::{RecordingClient, block_on, unwrap_outcome};
use relmodel::prelude::*;
use relmodel::{PlanOpKind, PlanningErrorKind, ResolutionErrorKind};

const QA_SCHEMA: &str = r#"{
    "entities": [
        {
            "name": "Category",
            "table_name": "category",
            "primary_columns": [{"name": "id", "generated": true}],
            "relations": [
                {"property": "questions", "kind": "many_to_many", "target": "Question",
                 "inverse_property": "categories"}
            ]
        },
        {
            "name": "Question",
            "table_name": "question",
            "primary_columns": [{"name": "id", "generated": true}],
            "relations": [
                {"property": "categories", "kind": "many_to_many", "target": "Category",
                 "inverse_property": "questions", "join_table": {}, "cascade": ["insert"]},
                {"property": "answers", "kind": "one_to_many", "target": "Answer",
                 "inverse_property": "question", "cascade": true},
                {"property": "author", "kind": "many_to_one", "target": "User",
                 "nullable": false}
            ]
        },
        {
            "name": "Answer",
            "table_name": "answer",
            "primary_columns": [{"name": "id", "generated": true}],
            "relations": [
                {"property": "question", "kind": "many_to_one", "target": "Question",
                 "inverse_property": "answers"}
            ]
        },
        {
            "name": "User",
            "table_name": "user_account",
            "primary_columns": [{"name": "id", "generated": true}]
        }
    ]
}"#;

fn qa_session() -> CascadeSession<RecordingClient> {
    let store = resolve(&RawSchema::from_json(QA_SCHEMA).unwrap()).unwrap();
    CascadeSession::new(Arc::new(store), RecordingClient::new())
}

#[test]
fn saving_question_with_new_categories_links_them_last() {
    let session = qa_session();
    let mut graph = InstanceGraph::new();
    let author = graph.add_persisted("User", [("id", 9_i64)]);
    let q = graph.add("Question", [("title", "Why?")]);
    let c1 = graph.add("Category", [("name", "philosophy")]);
    let c2 = graph.add("Category", [("name", "physics")]);
    graph.set_one(q, "author", Some(author));
    graph.set_many(q, "categories", vec![c1, c2]);

    let plan = session.plan_save(&graph, q).unwrap();
    assert_eq!(plan.count(PlanOpKind::Insert), 3);
    assert_eq!(plan.count(PlanOpKind::InsertJunction), 2);
    assert_eq!(plan.len(), 5);
    assert!(plan.ops()[3..].iter().all(|op| op.kind() == PlanOpKind::InsertJunction));
    assert!(plan.position_of(c1).unwrap() < plan.position_of(q).unwrap());
    assert!(plan.position_of(c2).unwrap() < plan.position_of(q).unwrap());

    let cx = Cx::for_testing();
    let result = unwrap_outcome(block_on(session.save(&cx, &mut graph, q)));
    assert_eq!(result.inserted, 3);
    assert_eq!(result.junction_inserted, 2);
    assert_eq!(result.total(), 5);

    assert_eq!(
        session.client().log(),
        vec![
            "INSERT category (name='philosophy')",
            "INSERT category (name='physics')",
            "INSERT question (title='Why?', authorId=9)",
            "LINK question_categories_category (questionId=3, categoryId=1)",
            "LINK question_categories_category (questionId=3, categoryId=2)",
        ]
    );
}

#[test]
fn saving_from_the_inverse_side_writes_owner_oriented_rows() {
    let store = resolve(&RawSchema::from_json(QA_SCHEMA).unwrap()).unwrap();
    let session = CascadeSession::new(Arc::new(store), RecordingClient::new());
    let mut graph = InstanceGraph::new();
    let c = graph.add_persisted(
        "Category",
        [("id", Value::from(4_i64)), ("name", Value::from("history"))],
    );
    let q = graph.add_persisted("Question", [("id", 8_i64)]);
    graph.set_many(c, "questions", vec![q]);

    let cx = Cx::for_testing();
    unwrap_outcome(block_on(session.save(&cx, &mut graph, c)));
    assert_eq!(
        session.client().log(),
        vec![
            "UPDATE category SET name='history' WHERE id=4",
            "LINK question_categories_category (questionId=8, categoryId=4)",
        ]
    );
}

#[test]
fn mutual_references_are_planned_once_each() {
    let session = qa_session();
    let mut graph = InstanceGraph::new();
    let author = graph.add_persisted("User", [("id", 1_i64)]);
    let q = graph.add("Question", [("title", "loop")]);
    let a = graph.add("Answer", [("text", "back")]);
    graph.set_one(q, "author", Some(author));
    graph.set_many(q, "answers", vec![a]);
    graph.set_one(a, "question", Some(q));

    let from_question = session.plan_save(&graph, q).unwrap();
    assert_eq!(from_question.len(), 2);
    assert_eq!(from_question.position_of(q), Some(0));
    assert_eq!(from_question.position_of(a), Some(1));

    // Planning is deterministic for an unchanged graph.
    assert_eq!(session.plan_save(&graph, q).unwrap(), from_question);
}

#[test]
fn missing_required_relation_is_reported_with_context() {
    let session = qa_session();
    let mut graph = InstanceGraph::new();
    let q = graph.add("Question", [("title", "orphan")]);
    let author = graph.add("User", [("name", "new user")]);
    graph.set_one(q, "author", Some(author));

    let cx = Cx::for_testing();
    let outcome = block_on(session.save(&cx, &mut graph, q));
    let Outcome::Err(Error::Planning(err)) = outcome else {
        panic!("expected a planning error");
    };
    assert_eq!(err.kind, PlanningErrorKind::UnsavedRelationWithoutCascade);
    assert_eq!(err.entity, "Question");
    assert_eq!(err.relation.as_deref(), Some("author"));
    assert!(err.to_string().contains("User(new #1)"));
    assert!(session.client().log().is_empty());
}

#[test]
fn execution_failure_keeps_completed_prefix() {
    let store = resolve(&RawSchema::from_json(QA_SCHEMA).unwrap()).unwrap();
    let session = CascadeSession::new(Arc::new(store), RecordingClient::failing_on(2));
    let mut graph = InstanceGraph::new();
    let author = graph.add_persisted("User", [("id", 9_i64)]);
    let q = graph.add("Question", [("title", "Why?")]);
    let c1 = graph.add("Category", [("name", "a")]);
    let c2 = graph.add("Category", [("name", "b")]);
    graph.set_one(q, "author", Some(author));
    graph.set_many(q, "categories", vec![c1, c2]);

    let cx = Cx::for_testing();
    let outcome = block_on(session.save(&cx, &mut graph, q));
    let Outcome::Err(Error::Execution(err)) = outcome else {
        panic!("expected an execution error");
    };
    assert_eq!(err.completed, 2);
    assert_eq!(err.failed_index, 2);
    assert_eq!(err.operation, "insert Question(new #1)");
    assert_eq!(session.client().log().len(), 2);
    assert!(graph.get(c2).unwrap().is_persisted());
    assert!(!graph.get(q).unwrap().is_persisted());
}

#[test]
fn composite_key_reference_needs_full_column_list() {
    let missing = RawSchema::new()
        .entity(RawEntity::new("Seat").primary("row").primary("number"))
        .entity(
            RawEntity::new("Ticket")
                .generated_primary("id")
                .relation(RawRelation::many_to_one("seat", "Seat")),
        );
    let err = resolve(&missing).unwrap_err();
    assert_eq!(
        err.resolution_kind(),
        Some(ResolutionErrorKind::CompositeKeyArityMismatch)
    );

    let complete = RawSchema::new()
        .entity(RawEntity::new("Seat").table("seat").primary("row").primary("number"))
        .entity(
            RawEntity::new("Ticket").table("ticket").generated_primary("id").relation(
                RawRelation::many_to_one("seat", "Seat")
                    .join_column_named(Some("seatRow"), Some("row"))
                    .join_column_named(Some("seatNumber"), Some("number"))
                    .cascade(CascadeOptions::insert()),
            ),
        );
    let session =
        CascadeSession::new(Arc::new(resolve(&complete).unwrap()), RecordingClient::new());

    let mut graph = InstanceGraph::new();
    let seat = graph.add("Seat", [("row", Value::from("B")), ("number", Value::from(4_i64))]);
    let ticket = graph.add("Ticket", [("price", 30_i64)]);
    graph.set_one(ticket, "seat", Some(seat));

    let cx = Cx::for_testing();
    unwrap_outcome(block_on(session.save(&cx, &mut graph, ticket)));
    assert_eq!(
        session.client().log(),
        vec![
            "INSERT seat (number=4, row='B')",
            "INSERT ticket (price=30, seatRow='B', seatNumber=4)",
        ]
    );

    // A stored row with part of its key missing cannot be identified.
    let mut graph = InstanceGraph::new();
    let seat = graph.add_persisted("Seat", [("row", "C")]);
    let ticket = graph.add("Ticket", [("price", 10_i64)]);
    graph.set_one(ticket, "seat", Some(seat));
    let err = session.plan_save(&graph, ticket).unwrap_err();
    assert_eq!(
        err.planning_kind(),
        Some(PlanningErrorKind::CompositeKeyArityMismatch)
    );
}

#[test]
fn resolution_is_deterministic() {
    let schema = RawSchema::from_json(QA_SCHEMA).unwrap();
    let first = resolve(&schema).unwrap();
    let second = resolve(&schema).unwrap();
    let owning = |store: &RelationDescriptorStore| {
        store
            .relations()
            .iter()
            .map(|r| (r.property.clone(), r.is_owning_side))
            .collect::<Vec<_>>()
    };
    assert_eq!(owning(&first), owning(&second));
}
