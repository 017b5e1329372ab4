//! Assembly-level peephole optimization (spec §4.5 step 4): local
//! rewrites over the already-selected `AsmLine` stream, distinct from
//! (and running after) the MIR-level peephole pass in `opt::peephole`.
//!
//! Operates on the structured `AsmLine` list rather than re-parsing
//! text, and never looks across a `Label` boundary — a jump target
//! might be reached from somewhere other than fall-through, so an
//! adjacency match that happens to span a label could change behavior
//! for any other predecessor of that label. Matching stops at labels
//! by construction: every window this module looks at is taken from
//! one label-delimited run at a time.

use super::isel::AsmLine;

/// Run every rewrite to a fixed point over one label-delimited run of
/// lines, then rejoin the runs back into the whole stream.
pub fn run(lines: Vec<AsmLine>) -> Vec<AsmLine> {
    let mut out = Vec::with_capacity(lines.len());
    let mut run_buf: Vec<AsmLine> = Vec::new();

    for line in lines {
        if matches!(line, AsmLine::Label(_)) {
            out.extend(optimize_run(std::mem::take(&mut run_buf)));
            out.push(line);
        } else {
            run_buf.push(line);
        }
    }
    out.extend(optimize_run(run_buf));
    out
}

fn optimize_run(mut run: Vec<AsmLine>) -> Vec<AsmLine> {
    loop {
        let before = run.len();
        run = remove_redundant_load(run);
        run = collapse_push_pop(run);
        if run.len() == before {
            break;
        }
    }
    run
}

/// `LD r, x` immediately followed by another `LD r, x` with the exact
/// same operands is a no-op repeat — drops the second.
fn remove_redundant_load(lines: Vec<AsmLine>) -> Vec<AsmLine> {
    let mut out: Vec<AsmLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if let (Some(AsmLine::Op { mnemonic: pm, operands: po, .. }), AsmLine::Op { mnemonic, operands, .. }) =
            (out.last(), &line)
        {
            if pm == "LD" && mnemonic == "LD" && po == operands {
                continue;
            }
        }
        out.push(line);
    }
    out
}

/// A `PUSH r` immediately followed by `POP r` of the same register is a
/// no-op (the value round-trips through the stack unchanged) and is
/// removed entirely.
fn collapse_push_pop(lines: Vec<AsmLine>) -> Vec<AsmLine> {
    let mut out: Vec<AsmLine> = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(AsmLine::Op { mnemonic: pm, operands: po, .. }) = out.last() {
            if let AsmLine::Op { mnemonic, operands, .. } = &line {
                if pm == "PUSH" && mnemonic == "POP" && po == operands {
                    out.pop();
                    continue;
                }
            }
        }
        out.push(line);
    }
    out
}
