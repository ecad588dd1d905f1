mod fragment;
mod highlevel;

pub(crate) use fragment::FragmentTable;
pub(crate) use highlevel::{
    count_swap_conflicts, Constraint, FromToTable, HighLevelNode, Objective,
};
