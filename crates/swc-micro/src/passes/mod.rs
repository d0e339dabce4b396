//! The backend pass set.

mod const_prop;
mod dead_store;
mod encode;
mod legalize;
mod prolog_epilog;
mod regalloc;

pub use const_prop::ConstantPropagationPass;
pub use dead_store::DeadStorePass;
pub use encode::EncodePass;
pub use legalize::LegalizePass;
pub use prolog_epilog::PrologEpilogPass;
pub use regalloc::RegisterAllocationPass;

use crate::pass::MicroPassManager;

/// The standard pipeline: optimization passes around the mandatory
/// RegisterAllocation -> PrologEpilog -> Legalize sequence, then Encode.
pub fn default_pipeline() -> MicroPassManager {
    let mut manager = MicroPassManager::new();
    manager.add_pre_optimization(Box::new(ConstantPropagationPass));
    manager.add_pre_optimization(Box::new(DeadStorePass));
    manager.add_mandatory(Box::new(RegisterAllocationPass));
    manager.add_mandatory(Box::new(PrologEpilogPass));
    manager.add_mandatory(Box::new(LegalizePass));
    manager.add_post_optimization(Box::new(DeadStorePass));
    manager.add_final(Box::new(EncodePass));
    manager
}
