// Puzzle generator/solver adapter.
// Produces a fresh random puzzle and its unique solution per call. Cells are
// emitted in the upstream generator's 0-based digit alphabet (0-8, blanks as
// None); callers remap digit 0 to 9 before storing or serving anything, so
// stored grids hold only 1-9.

use spacetimedb::rand::seq::SliceRandom;
use spacetimedb::rand::Rng;

/// Cells per side of the board
const SIDE: usize = 9;
/// Total cells on the board
pub const CELL_COUNT: usize = 81;

/// One flat 81-cell grid in wire form: None = blank, Some(d) = digit
pub type Cells = Vec<Option<u8>>;

/// A freshly generated puzzle and its unique solution, still in the
/// 0-based digit alphabet (see module header)
pub struct RawPuzzle {
    pub grid: Cells,
    pub solution: Cells,
}

/// Generate a puzzle with a unique solution.
/// Fills a complete board with a randomized backtracking pass, then removes
/// clues in random order, keeping each removal only while the solution count
/// stays at exactly one.
pub fn generate(rng: &mut impl Rng) -> RawPuzzle {
    let solution = fill_solution(rng);
    let grid = dig_holes(&solution, rng);

    RawPuzzle {
        grid: to_wire(&grid),
        solution: to_wire(&solution),
    }
}

/// Remap digit 0 to 9 in a wire grid, leaving blanks alone.
/// This is the storage normalization the whole catalog relies on: stored
/// grids and solutions contain only values 1-9, never a 0 sentinel.
pub fn remap_zeroes(cells: &Cells) -> Cells {
    cells
        .iter()
        .map(|cell| cell.map(|d| if d == 0 { 9 } else { d }))
        .collect()
}

/// Build a complete, valid board. Internally uses digits 1-9 with 0 as the
/// empty marker; the digit order is shuffled once so each call yields a
/// different board.
fn fill_solution(rng: &mut impl Rng) -> [u8; CELL_COUNT] {
    let mut board = [0u8; CELL_COUNT];
    let mut digits: [u8; SIDE] = [1, 2, 3, 4, 5, 6, 7, 8, 9];
    digits.shuffle(rng);
    // A backtracking fill from an empty board always succeeds
    fill_from(&mut board, 0, &digits);
    board
}

fn fill_from(board: &mut [u8; CELL_COUNT], from: usize, digits: &[u8; SIDE]) -> bool {
    let index = match (from..CELL_COUNT).find(|&i| board[i] == 0) {
        Some(i) => i,
        None => return true,
    };
    for &digit in digits {
        if placement_ok(board, index, digit) {
            board[index] = digit;
            if fill_from(board, index + 1, digits) {
                return true;
            }
            board[index] = 0;
        }
    }
    false
}

/// Whether placing `digit` at `index` keeps the row, column and box valid
fn placement_ok(board: &[u8; CELL_COUNT], index: usize, digit: u8) -> bool {
    let row = index / SIDE;
    let col = index % SIDE;
    let box_origin = (row / 3) * 3 * SIDE + (col / 3) * 3;

    for i in 0..SIDE {
        if board[row * SIDE + i] == digit || board[i * SIDE + col] == digit {
            return false;
        }
        let box_index = box_origin + (i / 3) * SIDE + (i % 3);
        if board[box_index] == digit {
            return false;
        }
    }
    true
}

/// Remove clues from a full solution in random order, backing out any removal
/// that lets a second solution appear
fn dig_holes(solution: &[u8; CELL_COUNT], rng: &mut impl Rng) -> [u8; CELL_COUNT] {
    let mut puzzle = *solution;
    let mut indices: Vec<usize> = (0..CELL_COUNT).collect();
    indices.shuffle(rng);

    for index in indices {
        let removed = puzzle[index];
        puzzle[index] = 0;
        if count_solutions(&mut puzzle, 2) != 1 {
            puzzle[index] = removed;
        }
    }
    puzzle
}

/// Count solutions of a board, stopping once `cap` are found
fn count_solutions(board: &mut [u8; CELL_COUNT], cap: usize) -> usize {
    let index = match board.iter().position(|&c| c == 0) {
        Some(i) => i,
        None => return 1,
    };
    let mut found = 0;
    for digit in 1..=SIDE as u8 {
        if placement_ok(board, index, digit) {
            board[index] = digit;
            found += count_solutions(board, cap - found);
            board[index] = 0;
            if found >= cap {
                break;
            }
        }
    }
    found
}

/// Shift the internal 1-9 board to the upstream 0-8 wire alphabet
fn to_wire(board: &[u8; CELL_COUNT]) -> Cells {
    board
        .iter()
        .map(|&cell| if cell == 0 { None } else { Some(cell - 1) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacetimedb::rand::rngs::StdRng;
    use spacetimedb::rand::SeedableRng;

    fn assert_valid_solution(board: &[u8; CELL_COUNT]) {
        for group in 0..SIDE {
            let mut row_seen = [false; SIDE + 1];
            let mut col_seen = [false; SIDE + 1];
            let mut box_seen = [false; SIDE + 1];
            for i in 0..SIDE {
                let row_cell = board[group * SIDE + i] as usize;
                let col_cell = board[i * SIDE + group] as usize;
                let box_origin = (group / 3) * 3 * SIDE + (group % 3) * 3;
                let box_cell = board[box_origin + (i / 3) * SIDE + (i % 3)] as usize;
                assert!((1..=SIDE).contains(&row_cell), "cell out of range");
                assert!(!row_seen[row_cell], "duplicate in row {}", group);
                assert!(!col_seen[col_cell], "duplicate in column {}", group);
                assert!(!box_seen[box_cell], "duplicate in box {}", group);
                row_seen[row_cell] = true;
                col_seen[col_cell] = true;
                box_seen[box_cell] = true;
            }
        }
    }

    #[test]
    fn fill_produces_valid_complete_board() {
        let mut rng = StdRng::seed_from_u64(7);
        let board = fill_solution(&mut rng);
        assert_valid_solution(&board);
    }

    #[test]
    fn dug_puzzle_keeps_unique_solution() {
        let mut rng = StdRng::seed_from_u64(11);
        let solution = fill_solution(&mut rng);
        let mut puzzle = dig_holes(&solution, &mut rng);
        let clues = puzzle.iter().filter(|&&c| c != 0).count();
        assert!(clues >= 17, "fewer clues than any valid puzzle can have");
        assert!(clues < CELL_COUNT, "digging removed nothing");
        assert_eq!(count_solutions(&mut puzzle, 2), 1);
    }

    #[test]
    fn generated_pair_round_trips_after_remap() {
        let mut rng = StdRng::seed_from_u64(42);
        let raw = generate(&mut rng);
        let grid = remap_zeroes(&raw.grid);
        let solution = remap_zeroes(&raw.solution);

        assert_eq!(grid.len(), CELL_COUNT);
        assert_eq!(solution.len(), CELL_COUNT);

        // Solution is complete and every present value sits in 1-9 with no
        // zero sentinel surviving the remap
        for cell in &solution {
            let digit = cell.expect("solution must be fully filled");
            assert!((1..=9).contains(&digit));
        }
        for cell in grid.iter().flatten() {
            assert!((1..=9).contains(cell));
        }

        // Every given grid cell must agree with the solution
        for (given, solved) in grid.iter().zip(&solution) {
            if let Some(digit) = given {
                assert_eq!(Some(digit), solved.as_ref());
            }
        }
    }

    #[test]
    fn remap_touches_only_zeroes() {
        let cells: Cells = vec![Some(0), Some(3), None, Some(8), Some(0)];
        assert_eq!(
            remap_zeroes(&cells),
            vec![Some(9), Some(3), None, Some(8), Some(9)]
        );
    }
}
