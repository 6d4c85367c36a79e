//! Data structures for per-taxon differential abundance testing.

mod count_matrix;
mod design_matrix;
mod frame;
mod metadata;
mod model_spec;
mod result;

pub use count_matrix::CountMatrix;
pub use design_matrix::DesignMatrix;
pub use frame::{FrameContext, SampleScope, TaxonFrame};
pub use metadata::{Metadata, Variable, VariableType};
pub use model_spec::{Family, Interaction, ModelSpec};
pub use result::{ResultSummary, ResultTable, TaxonRecord, TestRecord};
