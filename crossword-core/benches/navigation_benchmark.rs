use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use crossword_core::puzzle::puzzle_from_rows;
use crossword_core::{reduce, Action, Board, Direction, NavInput, Origin, PuzzleState, Selection};
use std::sync::Arc;

// 15x15 with the usual symmetric block pattern.
const ROWS: [&str; 15] = [
    "ABCD#EFGHI#JKLM",
    "ABCD#EFGHI#JKLM",
    "ABCDEFGHIJ#JKLM",
    "ABC#ABCD#ABCDEF",
    "###ABCD#ABCDEFG",
    "ABCDEF#ABCD#ABC",
    "ABCDE#ABCDE#ABC",
    "ABCD#ABCDEF#ABC",
    "ABC#ABCDE#ABCDE",
    "ABC#ABCD#ABCDEF",
    "ABCDEFG#ABCD###",
    "ABCDEF#ABCD#ABC",
    "ABCD#ABCDEFGHIJ",
    "ABCD#ABCDE#ABCD",
    "ABCD#ABCDE#ABCD",
];

fn board() -> Arc<Board> {
    Board::new("bench", puzzle_from_rows(&ROWS)).unwrap()
}

fn bench_board_build(c: &mut Criterion) {
    let puzzle = puzzle_from_rows(&ROWS);
    c.bench_function("board_build_15x15", |b| {
        b.iter(|| black_box(Board::new("bench", black_box(puzzle.clone())).unwrap()))
    });
}

fn bench_letter_advance(c: &mut Criterion) {
    let board = board();
    let nav = board.navigator();
    let start = nav.first_selection().unwrap();

    let mut group = c.benchmark_group("Navigation");
    group.throughput(Throughput::Elements(1));
    group.bench_function("letter_advance", |b| {
        let mut sel = start;
        b.iter(|| {
            let out = nav.apply(sel, |_| false, black_box(NavInput::Letter('A'))).unwrap();
            sel = out.selection;
        })
    });
    group.bench_function("tab_cycle_down", |b| {
        let mut sel = Selection::new(board.clues.spans(Direction::Down)[0].first(), Direction::Down);
        b.iter(|| {
            sel = nav.jump_span(black_box(sel), true).unwrap();
        })
    });
    group.finish();
}

fn bench_reduce_set_cell(c: &mut Criterion) {
    let board = board();
    let state = reduce(&PuzzleState::default(), &Action::LoadPuzzle { board: board.clone(), saved: None }, Origin::Local);
    let cells: Vec<_> = board.grid.open_cells().map(|c| c.pos).collect();

    c.bench_function("reduce_set_cell", |b| {
        let mut i = 0;
        b.iter(|| {
            let action = Action::SetCell {
                pos: cells[i % cells.len()],
                value: Some('A'),
                mode: Default::default(),
            };
            i += 1;
            black_box(reduce(&state, &action, Origin::Remote))
        })
    });
}

criterion_group!(benches, bench_board_build, bench_letter_advance, bench_reduce_set_cell);
criterion_main!(benches);
