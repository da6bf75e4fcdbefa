use crate::{
    domain::RowIndex,
    engine::project::{BlockMark, RowMarks},
};

/// Rows to append to the end of their container, in the order they must be appended.
/// Only collapsed roots move; their hidden descendants stay where they are.
pub fn reorder(index: &RowIndex, marks: &[RowMarks]) -> Vec<usize> {
    index
        .rows()
        .iter()
        .zip(marks)
        .enumerate()
        .filter(|(_, (row, mark))| row.is_root() && mark.block == BlockMark::Collapsed)
        .map(|(i, _)| i)
        .collect()
}

/// Document positions in render order after applying `moves`.
pub fn render_order(len: usize, moves: &[usize]) -> Vec<usize> {
    let mut moved = vec![false; len];
    for &i in moves.iter().filter(|&&i| i < len) {
        moved[i] = true;
    }
    let mut order: Vec<usize> = (0..len).filter(|&i| !moved[i]).collect();
    order.extend(moves.iter().copied().filter(|&i| i < len));
    order
}
