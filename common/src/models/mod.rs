pub mod registry;

pub use registry::{
    detect_marker, is_allowed_tool_model, is_local_path, is_repo_reference, name_marker,
    QuantMarker, TOOL_MODEL_ALLOW_LIST,
};
