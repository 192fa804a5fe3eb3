mod builder;
mod predicate;

pub use builder::{
    build_batch_insert, build_create_table, build_join_select, build_select, CreateTable,
    InsertBatch, JoinClause, SelectQuery, DEFAULT_BATCH_SIZE,
};
pub use predicate::{render_literal, CompareOp, Condition, Operand};
