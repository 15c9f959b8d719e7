/// Knobs of the decompilation pipeline.
///
/// All iteration caps are counts rather than timeouts, so that the output is a pure function of
/// the input.
#[derive(Clone, Debug)]
pub struct Config {
    /// Re-balance the layout so that statements land on their original line numbers.
    pub realign_line_numbers: bool,
    /// Trust `LocalVariableTable` names and types when present.
    pub use_debug_names: bool,
    /// Cap of the local variable type propagation fixpoint.
    pub max_type_iterations: usize,
    /// Cap of the fixpoint each pattern reconstructor runs internally, and of the number of times
    /// the whole reconstructor sequence is repeated.
    pub max_pattern_iterations: usize,
    /// Cap of layout compaction/relocation rounds.
    pub max_layout_rounds: usize,
    /// Cap of the rounds recognizing source idioms (`for`, for-each, string `switch`, ...) in the
    /// structured tree. Each recognized idiom can expose another one around it.
    pub max_label_rounds: usize,
    /// Display synthetic members (accessors, switch maps, `class$` helpers, `$VALUES`) instead of
    /// eliding them.
    pub show_synthetic: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            realign_line_numbers: true,
            use_debug_names: true,
            max_type_iterations: 32,
            max_pattern_iterations: 16,
            max_layout_rounds: 64,
            max_label_rounds: 4,
            show_synthetic: false,
        }
    }
}
