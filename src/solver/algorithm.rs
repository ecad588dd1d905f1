mod astar;

pub(crate) use astar::{
    constrained_search, reserved_goals, ConstraintFilter, GreedyOrder, MoveFilter, PlainOrder,
    PrioritizedFilter, SwapAwareOrder,
};
