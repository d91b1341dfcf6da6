//! Graph rewrite passes.

mod pad_slice_elimination;
mod ref_copy_insertion;
mod resource_identity;
mod slice_hoist;
mod transpose_broadcast;
mod variable_ref_resolution;

pub use pad_slice_elimination::PadSliceEliminationPass;
pub use ref_copy_insertion::RefCopyInsertionPass;
pub use resource_identity::{HANDLE_ID_ATTR, MAX_SIZE_ATTR, ResourceIdentityPass};
pub use slice_hoist::SliceHoistPass;
pub use transpose_broadcast::TransposeBroadcastPass;
pub use variable_ref_resolution::{
    PARENT_NODE_INDEX_ATTR, REF_VAR_SRC_VAR_NAME_ATTR, VariableRefResolutionPass,
};
