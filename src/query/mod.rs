//! Query pipeline: the declarative [`QuerySpec`], its translation into
//! the store's native shape, and result processing into rows.

pub mod processor;
pub mod spec;
pub mod translator;

pub use processor::{PageResult, Row, process_page, process_row};
pub use spec::{
    Direction, Distinct, Filter, ID_COLUMN, KEY_PSEUDO_COLUMN, Operator, Order, QuerySpec,
};
pub use translator::QueryTranslator;
