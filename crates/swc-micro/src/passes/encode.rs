//! Final pass: drive the machine encoder.

use crate::instr::MicroOpcode;
use crate::pass::{MicroPass, MicroPassContext, MicroRegPrintMode};
use swc_util::Span;

#[derive(Default)]
pub struct EncodePass;

impl MicroPass for EncodePass {
    fn name(&self) -> &'static str {
        "encode"
    }

    fn print_mode_before(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Concrete
    }

    fn print_mode_after(&self) -> MicroRegPrintMode {
        MicroRegPrintMode::Concrete
    }

    fn run(&mut self, ctx: &mut MicroPassContext<'_>) -> bool {
        // Every referenced label must be placed before bytes are laid out.
        if !ctx.func.all_labels_placed() {
            ctx.handler.error(
                format!(
                    "function `{}`: jump to a label that was never placed",
                    ctx.func.symbol_name
                ),
                Span::DUMMY,
            );
            return false;
        }

        debug_assert!(
            ctx.func
                .instrs
                .refs()
                .all(|r| ctx.func.instr(r).op != MicroOpcode::Enter),
            "Enter survived the prolog/epilog pass"
        );

        let MicroPassContext {
            func,
            encoder,
            handler,
            ..
        } = ctx;
        match encoder.as_deref_mut() {
            Some(encoder) => {
                encoder.encode_function(func, handler);
            }
            None => {
                handler.error(
                    format!(
                        "function `{}`: no encoder configured for the final pass",
                        func.symbol_name
                    ),
                    Span::DUMMY,
                );
            }
        }
        false
    }
}
