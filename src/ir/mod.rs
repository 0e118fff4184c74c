pub mod function;
pub mod graph;
pub mod tensor;
pub mod types;

pub use function::FunctionLibrary;
pub use graph::{port_name, Attr, Graph, NameGen, Node, NodeBuilder, ELSE_BRANCH, LOOP_BODY, PLACEHOLDER, POISON, THEN_BRANCH};
pub use tensor::{Tensor, TensorData};
pub use types::{DType, Dim, Shape, ValueInfo};
