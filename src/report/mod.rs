pub mod matrix;
pub mod render;
pub mod types;

pub use matrix::{detect_date_column, MetricMatrix, DATE_CANDIDATES, TOTAL_KEY};
pub use render::{render_csv, write_csv, CSV_MIME};
pub use types::{Row, RowSet, Scalar};
