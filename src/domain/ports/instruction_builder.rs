use crate::domain::models::{Movement, Piece, RunState};

/// Everything an instruction template may refer to.
#[derive(Debug, Clone, Copy)]
pub struct InstructionContext<'a> {
    pub piece: &'a Piece,
    pub movement: &'a Movement,
    pub state: &'a RunState,
    pub task: &'a str,
    pub retry_note: Option<&'a str>,
    pub issue: Option<u32>,
    pub max_movements: u32,
    /// 1-based count of executions of this movement in the run
    pub movement_iteration: u32,
    pub interactive: bool,
}

/// Renders the prompt sent to the agent for one movement turn.
pub trait InstructionBuilder: Send + Sync {
    fn build(&self, ctx: &InstructionContext<'_>) -> String;
}
