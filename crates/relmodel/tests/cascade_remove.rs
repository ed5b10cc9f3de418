mod common;

use common::{RecordingClient, block_on, unwrap_outcome};
use relmodel::prelude::*;
use relmodel::{PlanOpKind, PlanningErrorKind};

fn qa_store() -> Arc<RelationDescriptorStore> {
    let schema = RawSchema::new()
        .entity(
            RawEntity::new("Category")
                .table("category")
                .generated_primary("id")
                .relation(RawRelation::many_to_many("questions", "Question").inverse("categories")),
        )
        .entity(
            RawEntity::new("Question")
                .table("question")
                .generated_primary("id")
                .relation(
                    RawRelation::many_to_many("categories", "Category")
                        .inverse("questions")
                        .join_table(RawJoinTable::default())
                        .cascade(CascadeOptions::insert()),
                )
                .relation(
                    RawRelation::one_to_many("answers", "Answer")
                        .inverse("question")
                        .cascade(CascadeOptions::all()),
                ),
        )
        .entity(
            RawEntity::new("Answer")
                .table("answer")
                .generated_primary("id")
                .relation(RawRelation::many_to_one("question", "Question").inverse("answers")),
        );
    Arc::new(resolve(&schema).unwrap())
}

fn poll_store(vote: RawRelation) -> Arc<RelationDescriptorStore> {
    let schema = RawSchema::new()
        .entity(
            RawEntity::new("Poll")
                .table("poll")
                .generated_primary("id")
                .relation(RawRelation::one_to_many("votes", "Vote").inverse("poll")),
        )
        .entity(
            RawEntity::new("Vote")
                .table("vote")
                .generated_primary("id")
                .relation(vote.inverse("votes")),
        );
    Arc::new(resolve(&schema).unwrap())
}

fn row(id: i64, column: &str, value: &str) -> [(String, Value); 2] {
    [
        ("id".to_string(), Value::from(id)),
        (column.to_string(), Value::from(value)),
    ]
}

/// A stored question with three answers and one category, all loaded.
fn loaded_question(graph: &mut InstanceGraph) -> (InstanceId, Vec<InstanceId>) {
    let q = graph.add_persisted("Question", row(1, "title", "Why?"));
    let answers: Vec<_> = (10..13)
        .map(|id| graph.add_persisted("Answer", row(id, "text", "because")))
        .collect();
    let c = graph.add_persisted("Category", row(7, "name", "philosophy"));
    graph.set_many(q, "answers", answers.clone());
    graph.set_many(q, "categories", vec![c]);
    for &a in &answers {
        graph.set_one(a, "question", Some(q));
    }
    graph.snapshot(q);
    (q, answers)
}

#[test]
fn removing_question_deletes_answers_first() {
    let session = CascadeSession::new(qa_store(), RecordingClient::new());
    let mut graph = InstanceGraph::new();
    let (q, answers) = loaded_question(&mut graph);

    let plan = session.plan_remove(&graph, q).unwrap();
    assert_eq!(plan.count(PlanOpKind::Delete), 4);
    assert_eq!(plan.count(PlanOpKind::DeleteJunction), 1);
    for &a in &answers {
        assert!(plan.position_of(a).unwrap() < plan.position_of(q).unwrap());
    }

    let cx = Cx::for_testing();
    let result = unwrap_outcome(block_on(session.remove(&cx, &mut graph, q)));
    assert_eq!(result.deleted, 4);
    assert_eq!(result.junction_deleted, 1);
    assert_eq!(
        session.client().log(),
        vec![
            "UNLINK question_categories_category (questionId=1, categoryId=7)",
            "DELETE answer WHERE id=10",
            "DELETE answer WHERE id=11",
            "DELETE answer WHERE id=12",
            "DELETE question WHERE id=1",
        ]
    );
    assert!(!graph.get(q).unwrap().is_persisted());
    assert!(answers.iter().all(|&a| !graph.get(a).unwrap().is_persisted()));
}

#[test]
fn restricted_dependents_block_the_remove() {
    let store = poll_store(RawRelation::many_to_one("poll", "Poll").nullable(false));
    let session = CascadeSession::new(store, RecordingClient::new());

    // Found through the loaded collection.
    let mut graph = InstanceGraph::new();
    let poll = graph.add_persisted("Poll", [("id", 1_i64)]);
    let vote = graph.add_persisted("Vote", [("id", 5_i64)]);
    graph.set_many(poll, "votes", vec![vote]);
    let err = session.plan_remove(&graph, poll).unwrap_err();
    assert_eq!(
        err.planning_kind(),
        Some(PlanningErrorKind::RestrictedDeleteViolation)
    );
    assert_eq!(err.entity(), Some("Poll"));

    // Found by scanning references when the collection is not loaded.
    let mut graph = InstanceGraph::new();
    let poll = graph.add_persisted("Poll", [("id", 1_i64)]);
    let vote = graph.add_persisted("Vote", [("id", 5_i64)]);
    graph.set_one(vote, "poll", Some(poll));
    let cx = Cx::for_testing();
    let outcome = block_on(session.remove(&cx, &mut graph, poll));
    let Outcome::Err(Error::Planning(err)) = outcome else {
        panic!("expected a planning error");
    };
    assert_eq!(err.kind, PlanningErrorKind::RestrictedDeleteViolation);
    assert_eq!(err.relation.as_deref(), Some("votes"));
    assert!(err.message.contains("Vote(id=5)"));
    assert!(session.client().log().is_empty());
}

#[test]
fn on_delete_cascade_removes_dependents() {
    let store = poll_store(
        RawRelation::many_to_one("poll", "Poll")
            .nullable(false)
            .on_delete(OnDelete::Cascade),
    );
    let session = CascadeSession::new(store, RecordingClient::new());
    let mut graph = InstanceGraph::new();
    let poll = graph.add_persisted("Poll", [("id", 1_i64)]);
    let vote = graph.add_persisted("Vote", [("id", 5_i64)]);
    graph.set_many(poll, "votes", vec![vote]);

    let cx = Cx::for_testing();
    unwrap_outcome(block_on(session.remove(&cx, &mut graph, poll)));
    assert_eq!(
        session.client().log(),
        vec!["DELETE vote WHERE id=5", "DELETE poll WHERE id=1"]
    );
}

#[test]
fn on_delete_set_null_clears_foreign_key_first() {
    let store = poll_store(RawRelation::many_to_one("poll", "Poll").on_delete(OnDelete::SetNull));
    let session = CascadeSession::new(store, RecordingClient::new());
    let mut graph = InstanceGraph::new();
    let poll = graph.add_persisted("Poll", [("id", 1_i64)]);
    let vote = graph.add_persisted("Vote", [("id", 5_i64)]);
    graph.set_many(poll, "votes", vec![vote]);

    let cx = Cx::for_testing();
    let result = unwrap_outcome(block_on(session.remove(&cx, &mut graph, poll)));
    assert_eq!(result.foreign_keys_updated, 1);
    assert_eq!(result.deleted, 1);
    assert_eq!(
        session.client().log(),
        vec![
            "UPDATE vote SET pollId=NULL WHERE id=5",
            "DELETE poll WHERE id=1",
        ]
    );
    assert!(graph.get(vote).unwrap().is_persisted());
}

#[test]
fn answer_dropped_from_collection_is_deleted_on_save() {
    let session = CascadeSession::new(qa_store(), RecordingClient::new());
    let mut graph = InstanceGraph::new();
    let (q, answers) = loaded_question(&mut graph);
    graph.remove_member(q, "answers", answers[1]);
    graph.unload(q, "categories");

    let cx = Cx::for_testing();
    let result = unwrap_outcome(block_on(session.save(&cx, &mut graph, q)));
    assert_eq!(result.deleted, 1);
    assert_eq!(
        session.client().log(),
        vec![
            "UPDATE question SET title='Why?' WHERE id=1",
            "UPDATE answer SET text='because', questionId=1 WHERE id=10",
            "UPDATE answer SET text='because', questionId=1 WHERE id=12",
            "DELETE answer WHERE id=11",
        ]
    );
    assert!(!graph.get(answers[1]).unwrap().is_persisted());

    // The snapshot was refreshed, so saving again deletes nothing.
    let plan = session.plan_save(&graph, q).unwrap();
    assert_eq!(plan.count(PlanOpKind::Delete), 0);
}

#[test]
fn failed_delete_reports_completed_prefix() {
    let session = CascadeSession::new(qa_store(), RecordingClient::failing_on(2));
    let mut graph = InstanceGraph::new();
    let (q, answers) = loaded_question(&mut graph);

    let cx = Cx::for_testing();
    let outcome = block_on(session.remove(&cx, &mut graph, q));
    let Outcome::Err(Error::Execution(err)) = outcome else {
        panic!("expected an execution error");
    };
    assert_eq!(err.completed, 2);
    assert_eq!(err.failed_index, 2);
    assert_eq!(err.operation, "delete Answer(id=11)");
    assert!(!graph.get(answers[0]).unwrap().is_persisted());
    assert!(graph.get(answers[1]).unwrap().is_persisted());
    assert!(graph.get(q).unwrap().is_persisted());
}

#[test]
fn removing_unsaved_root_is_rejected() {
    let session = CascadeSession::new(qa_store(), RecordingClient::new());
    let mut graph = InstanceGraph::new();
    let q = graph.add("Question", [("title", "draft")]);
    let err = session.plan_remove(&graph, q).unwrap_err();
    assert_eq!(
        err.planning_kind(),
        Some(PlanningErrorKind::CompositeKeyArityMismatch)
    );
}
