//! Property tests for rank ordering under arbitrary drops

use proptest::prelude::*;
use taskflow_kanban::{
    compute_reorder, Board, BoardModel, Column, ColumnId, DragIntent, Rank, Task, TaskId,
};

const COLUMNS: [&str; 3] = ["a", "b", "c"];

fn board(tasks_per_column: usize) -> BoardModel {
    let board = Board::new("Props", "ana");
    let columns: Vec<Column> = COLUMNS
        .iter()
        .zip(Rank::spaced(COLUMNS.len()))
        .map(|(id, rank)| {
            let mut column = Column::new(board.id.clone(), id.to_uppercase()).with_position(rank);
            column.id = ColumnId::from_string(*id);
            column
        })
        .collect();
    let mut tasks = Vec::new();
    for column in COLUMNS {
        for (i, rank) in Rank::spaced(tasks_per_column).enumerate() {
            let mut task = Task::new(ColumnId::from_string(column), format!("{column}{i}"));
            task.id = TaskId::from_string(format!("{column}{i}"));
            tasks.push(task.with_position(rank));
        }
    }
    let (model, repaired) = BoardModel::load(board, columns, tasks).unwrap();
    assert!(repaired.is_empty());
    model
}

fn assert_ordered(model: &BoardModel) {
    assert!(model
        .columns()
        .windows(2)
        .all(|w| w[0].position < w[1].position));
    for column in model.columns() {
        let tasks = model.tasks_of(&column.id);
        assert!(
            tasks.windows(2).all(|w| w[0].position < w[1].position),
            "column {} out of order: {:?}",
            column.id,
            tasks.iter().map(|t| t.position.value()).collect::<Vec<_>>()
        );
    }
}

fn order(model: &BoardModel, column: &str) -> Vec<String> {
    model
        .tasks_of(&ColumnId::from_string(column))
        .iter()
        .map(|t| t.id.to_string())
        .collect()
}

fn all_task_ids(model: &BoardModel) -> Vec<String> {
    let mut ids: Vec<String> = model.tasks().map(|t| t.id.to_string()).collect();
    ids.sort();
    ids
}

#[derive(Debug, Clone)]
enum Drop {
    Task { task: usize, column: usize, index: usize },
    Column { column: usize, index: usize },
}

fn drops() -> impl Strategy<Value = Drop> {
    prop_oneof![
        4 => (0usize..12, 0usize..3, 0usize..8)
            .prop_map(|(task, column, index)| Drop::Task { task, column, index }),
        1 => (0usize..3, 0usize..4).prop_map(|(column, index)| Drop::Column { column, index }),
    ]
}

fn intent(model: &BoardModel, drop: &Drop) -> DragIntent {
    match drop {
        Drop::Task { task, column, index } => {
            let ids = all_task_ids(model);
            DragIntent::task(ids[task % ids.len()].as_str(), COLUMNS[*column], *index)
        }
        Drop::Column { column, index } => DragIntent::column(COLUMNS[*column], *index),
    }
}

proptest! {
    #[test]
    fn prop_any_drop_sequence_keeps_order(sequence in prop::collection::vec(drops(), 1..40)) {
        let mut model = board(4);
        let ids = all_task_ids(&model);

        for drop in &sequence {
            let intent = intent(&model, drop);
            let reorder = compute_reorder(&model, &intent).unwrap();
            prop_assert_eq!(reorder.changes.is_empty(), reorder.model == model);
            model = reorder.model;
            assert_ordered(&model);
        }
        prop_assert_eq!(all_task_ids(&model), ids);
    }

    #[test]
    fn prop_drop_in_place_is_noop(task in 0usize..12) {
        let model = board(4);
        let ids = all_task_ids(&model);
        let id = TaskId::from_string(ids[task].as_str());
        let (column, index) = model.locate_task(&id).unwrap();

        let reorder = compute_reorder(&model, &DragIntent::task(id, column, index)).unwrap();
        prop_assert!(reorder.changes.is_empty());
        prop_assert_eq!(reorder.model, model);
    }

    #[test]
    fn prop_move_and_back_restores_order(task in 0usize..4) {
        let model = board(4);
        let before_a = order(&model, "a");
        let before_b = order(&model, "b");
        let id = before_a[task].clone();
        let (_, index) = model.locate_task(&TaskId::from_string(id.as_str())).unwrap();

        let there = compute_reorder(&model, &DragIntent::task(id.as_str(), "b", 2)).unwrap();
        prop_assert_eq!(&order(&there.model, "b")[2], &id);
        let back = compute_reorder(&there.model, &DragIntent::task(id.as_str(), "a", index)).unwrap();

        prop_assert_eq!(order(&back.model, "a"), before_a);
        prop_assert_eq!(order(&back.model, "b"), before_b);
    }

    #[test]
    fn prop_adjacent_insertions_stay_distinct(insertions in 50usize..120, slot in 1usize..3) {
        let mut model = board(4);
        for _ in 0..insertions {
            let last = order(&model, "a").pop().unwrap();
            let reorder = compute_reorder(&model, &DragIntent::task(last.as_str(), "a", slot)).unwrap();
            prop_assert!(!reorder.changes.is_empty());
            model = reorder.model;
            assert_ordered(&model);
        }
        prop_assert_eq!(model.tasks_of(&ColumnId::from_string("a")).len(), 4);
    }
}

#[test]
fn test_first_move_to_empty_column() {
    let mut model = board(2);
    for id in order(&model, "b") {
        model = compute_reorder(&model, &DragIntent::task(id.as_str(), "c", 0))
            .unwrap()
            .model;
    }
    assert!(order(&model, "b").is_empty());

    let reorder = compute_reorder(&model, &DragIntent::task("a0", "b", 0)).unwrap();
    assert_eq!(order(&reorder.model, "a"), vec!["a1"]);
    assert_eq!(order(&reorder.model, "b"), vec!["a0"]);
    let change = reorder.changes.get(&TaskId::from_string("a0").into()).unwrap();
    assert_eq!(change.column, Some(ColumnId::from_string("b")));
    assert_eq!(reorder.changes.len(), 1);
}
