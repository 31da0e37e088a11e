//! Register assignment sequencer.
//!
//! Turns a parallel assignment such as `{rdi: rsi, rsi: rdi, rax: 59}` into
//! an ordered list of `mov`/`xchg` steps that never overwrites a register
//! before every pending reader has consumed it.
//!
//! The assignment is a functional graph (each destination reads at most one
//! register), so it splits into chains and simple cycles. Chains are emitted
//! in dependency order by repeatedly writing a destination nobody still needs
//! to read; what is left afterwards is a set of cycles, each resolved with
//! `k - 1` swaps. Destinations that want the same constant are collapsed into
//! one materialization followed by register copies.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::types::{Assignment, Operation, Value};

/// Decides whether destinations sharing an opaque value may be collapsed.
pub type CollapseFilter = fn(&Value) -> bool;

/// Default filter: collapse everything except zero.
///
/// Zeroing a register is as cheap as copying one, so sharing a zero only
/// adds a dependency.
pub fn collapse_nonzero(value: &Value) -> bool {
    !value.is_zero()
}

/// Filter that disables collapsing.
pub fn collapse_never(_: &Value) -> bool {
    false
}

/// Knobs for [`sequence`].
#[derive(Debug, Clone, Copy)]
pub struct SortOptions {
    /// Choose randomly among destinations that are ready at the same time.
    pub randomize: bool,
    pub collapse: CollapseFilter,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            randomize: false,
            collapse: collapse_nonzero,
        }
    }
}

impl SortOptions {
    pub fn randomized() -> Self {
        Self {
            randomize: true,
            ..Self::default()
        }
    }
}

/// Compute the operations realizing `assignment`.
///
/// Every destination must be a member of `universe`. Values naming a member
/// of `universe` are register reads; anything else is materialized as-is by
/// whoever emits the resulting moves.
pub fn sequence(
    assignment: &Assignment,
    universe: &[&str],
    options: SortOptions,
) -> Result<Vec<Operation>> {
    let mut rng = rand::thread_rng();
    sequence_with_rng(assignment, universe, options, &mut rng)
}

/// Like [`sequence`], drawing tie-breaks from `rng` when randomizing.
pub fn sequence_with_rng<R: Rng + ?Sized>(
    assignment: &Assignment,
    universe: &[&str],
    options: SortOptions,
    rng: &mut R,
) -> Result<Vec<Operation>> {
    validate(assignment, universe)?;

    let mut pending: Vec<(&str, &Value)> = assignment
        .iter()
        .filter(|&(dst, value)| value.as_register(universe) != Some(dst))
        .collect();

    let post_moves = collapse(&mut pending, universe, options.collapse);

    let mut ops = Vec::with_capacity(pending.len() + post_moves.len());
    emit_ready_moves(&mut pending, universe, options.randomize, rng, &mut ops);
    resolve_cycles(&pending, universe, &mut ops)?;

    for (dst, canonical) in post_moves {
        ops.push(Operation::mov(dst, canonical));
    }

    debug!(
        destinations = assignment.len(),
        operations = ops.len(),
        "sequenced register assignment"
    );
    Ok(ops)
}

fn validate(assignment: &Assignment, universe: &[&str]) -> Result<()> {
    let mut unknown: Vec<String> = assignment
        .destinations()
        .filter(|dst| !universe.contains(dst))
        .map(String::from)
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort();
    unknown.dedup();
    Err(Error::InvalidRegister {
        names: unknown,
        universe: universe.iter().map(|r| r.to_string()).collect(),
    })
}

/// Pull destinations sharing an opaque value out of `pending`.
///
/// The lowest-named destination of each group keeps the value. The others
/// are returned as `(dst, canonical)` copies, sorted by `dst`, to run after
/// everything else.
fn collapse<'a>(
    pending: &mut Vec<(&'a str, &'a Value)>,
    universe: &[&str],
    filter: CollapseFilter,
) -> Vec<(&'a str, &'a str)> {
    let mut groups: BTreeMap<&Value, Vec<&str>> = BTreeMap::new();
    for &(dst, value) in pending.iter() {
        if value.as_register(universe).is_some() || !filter(value) {
            continue;
        }
        groups.entry(value).or_default().push(dst);
    }

    let mut post_moves = Vec::new();
    for (value, mut dsts) in groups {
        if dsts.len() < 2 {
            continue;
        }
        dsts.sort_unstable();
        let canonical = dsts[0];
        debug!(%value, canonical, copies = dsts.len() - 1, "collapsing shared value");
        post_moves.extend(dsts[1..].iter().map(|&dst| (dst, canonical)));
    }

    pending.retain(|(dst, _)| !post_moves.iter().any(|(other, _)| other == dst));
    post_moves.sort_unstable();
    post_moves
}

/// Emit moves for destinations no pending entry still reads.
///
/// Stops once every remaining destination is read by someone, which only
/// happens when the rest of the graph is made of cycles.
fn emit_ready_moves<'a, R: Rng + ?Sized>(
    pending: &mut Vec<(&'a str, &'a Value)>,
    universe: &[&str],
    randomize: bool,
    rng: &mut R,
    ops: &mut Vec<Operation>,
) {
    // Number of pending entries that still need each destination's old value.
    let mut readers: HashMap<&str, usize> = pending.iter().map(|&(dst, _)| (dst, 0)).collect();
    for &(_, value) in pending.iter() {
        if let Some(count) = value.as_register(universe).and_then(|src| readers.get_mut(src)) {
            *count += 1;
        }
    }

    loop {
        let min = match pending.iter().map(|&(dst, _)| readers_of(&readers, dst)).min() {
            Some(min) => min,
            None => break,
        };
        if min != 0 {
            break;
        }

        let ready: Vec<usize> = pending
            .iter()
            .enumerate()
            .filter(|&(_, &(dst, _))| readers_of(&readers, dst) == 0)
            .map(|(i, _)| i)
            .collect();
        let pick = if randomize {
            ready.choose(rng).copied()
        } else {
            ready.first().copied()
        };
        let Some(idx) = pick else { break };

        let (dst, value) = pending.remove(idx);
        readers.remove(dst);
        if let Some(count) = value.as_register(universe).and_then(|src| readers.get_mut(src)) {
            *count = count.saturating_sub(1);
        }
        trace!(dst, %value, "ready");
        ops.push(Operation::Move {
            dst: dst.to_string(),
            src: value.clone(),
        });
    }
}

fn readers_of(readers: &HashMap<&str, usize>, dst: &str) -> usize {
    readers.get(dst).copied().unwrap_or(0)
}

/// Resolve what `emit_ready_moves` left behind with swaps.
fn resolve_cycles(
    pending: &[(&str, &Value)],
    universe: &[&str],
    ops: &mut Vec<Operation>,
) -> Result<()> {
    let graph: HashMap<&str, &Value> = pending.iter().copied().collect();
    let mut visited: HashSet<&str> = HashSet::new();

    for &(start, _) in pending {
        if visited.contains(start) {
            continue;
        }
        match extract_cycle(start, &graph, universe)? {
            Some(path) => {
                debug!(?path, "breaking cycle");
                for pair in path.windows(2) {
                    ops.push(Operation::swap(pair[0], pair[1]));
                }
                visited.extend(path);
            }
            None => {
                warn!(start, "dependency chain leaves the graph without closing a cycle");
                visited.insert(start);
            }
        }
    }
    Ok(())
}

/// Follow register reads from `start` until the walk returns to `start`.
///
/// Returns `None` if the chain reaches a value that is not a pending
/// destination. The walk is bounded by the number of pending nodes.
fn extract_cycle<'a>(
    start: &'a str,
    graph: &HashMap<&'a str, &'a Value>,
    universe: &[&str],
) -> Result<Option<Vec<&'a str>>> {
    let mut path = vec![start];
    let mut current = start;
    loop {
        let next = graph
            .get(current)
            .copied()
            .and_then(|value| value.as_register(universe))
            .filter(|next| graph.contains_key(next));
        let Some(next) = next else {
            return Ok(None);
        };
        if next == start {
            return Ok(Some(path));
        }
        if path.len() >= graph.len() {
            return Err(Error::InternalConsistency(format!(
                "walk from {} exceeded {} pending registers: {:?}",
                start,
                graph.len(),
                path
            )));
        }
        path.push(next);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{emit_all, RegisterBank};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const REGS: &[&str] = &["a", "b", "c", "d", "e", "f"];

    fn asn(pairs: &[(&str, Value)]) -> Assignment {
        pairs.iter().cloned().collect()
    }

    fn reg(name: &str) -> Value {
        Value::from(name)
    }

    fn sort(a: &Assignment) -> Vec<Operation> {
        sequence(a, REGS, SortOptions::default()).unwrap()
    }

    fn replays(a: &Assignment, ops: &[Operation]) -> bool {
        let mut bank = RegisterBank::new(REGS);
        emit_all(ops, &mut bank).unwrap();
        bank.satisfies(a)
    }

    #[test]
    fn self_assignment_is_dropped() {
        assert!(sort(&asn(&[("a", reg("a"))])).is_empty());
        assert!(sort(&asn(&[("a", reg("a")), ("b", reg("b"))])).is_empty());
    }

    #[test]
    fn empty_assignment() {
        assert!(sort(&Assignment::new()).is_empty());
    }

    #[test]
    fn independent_moves_keep_input_order() {
        let ops = sort(&asn(&[("a", Value::Int(1)), ("b", Value::Int(2))]));
        assert_eq!(ops, vec![Operation::mov("a", 1), Operation::mov("b", 2)]);
    }

    #[test]
    fn two_cycle_is_one_swap() {
        let ops = sort(&asn(&[("a", reg("b")), ("b", reg("a"))]));
        assert_eq!(ops, vec![Operation::swap("a", "b")]);
    }

    #[test]
    fn reader_goes_before_writer() {
        let ops = sort(&asn(&[("a", Value::Int(1)), ("b", reg("a"))]));
        assert_eq!(ops, vec![Operation::mov("b", "a"), Operation::mov("a", 1)]);
    }

    #[test]
    fn shared_constant_is_collapsed() {
        let ops = sort(&asn(&[("a", Value::Int(1)), ("b", Value::Int(1))]));
        assert_eq!(ops, vec![Operation::mov("a", 1), Operation::mov("b", "a")]);
    }

    #[test]
    fn collapse_picks_lowest_name() {
        let a = asn(&[("c", Value::Int(7)), ("b", Value::Int(7)), ("d", Value::Int(7))]);
        let ops = sort(&a);
        assert_eq!(
            ops,
            vec![
                Operation::mov("b", 7),
                Operation::mov("c", "b"),
                Operation::mov("d", "b"),
            ]
        );
    }

    #[test]
    fn symbols_collapse_like_constants() {
        let a = asn(&[("a", reg("SYS_execve")), ("b", reg("SYS_execve"))]);
        assert_eq!(
            sort(&a),
            vec![Operation::mov("a", "SYS_execve"), Operation::mov("b", "a")]
        );
    }

    #[test]
    fn zero_is_not_collapsed() {
        let ops = sort(&asn(&[("a", Value::Int(0)), ("b", Value::Int(0))]));
        assert_eq!(ops, vec![Operation::mov("a", 0), Operation::mov("b", 0)]);
    }

    #[test]
    fn shared_register_source_is_not_collapsed() {
        let ops = sort(&asn(&[("a", reg("c")), ("b", reg("c"))]));
        assert_eq!(ops, vec![Operation::mov("a", "c"), Operation::mov("b", "c")]);
    }

    #[test]
    fn custom_collapse_filter() {
        let a = asn(&[("a", Value::Int(1)), ("b", Value::Int(1))]);
        let opts = SortOptions {
            collapse: collapse_never,
            ..SortOptions::default()
        };
        let ops = sequence(&a, REGS, opts).unwrap();
        assert_eq!(ops, vec![Operation::mov("a", 1), Operation::mov("b", 1)]);
    }

    #[test]
    fn cycle_after_independent_moves() {
        let a = asn(&[("a", reg("b")), ("b", reg("a")), ("c", Value::Int(3))]);
        let ops = sort(&a);
        assert_eq!(ops, vec![Operation::mov("c", 3), Operation::swap("a", "b")]);
    }

    #[test]
    fn four_cycle_uses_three_swaps() {
        let a = asn(&[("a", reg("b")), ("b", reg("c")), ("c", reg("d")), ("d", reg("a"))]);
        let ops = sort(&a);
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|op| matches!(op, Operation::Swap(..))));
        assert!(replays(&a, &ops));
    }

    #[test]
    fn chain_is_emitted_back_to_front() {
        let a = asn(&[("c", Value::Int(1)), ("b", reg("c")), ("a", reg("b"))]);
        let ops = sort(&a);
        assert_eq!(
            ops,
            vec![
                Operation::mov("a", "b"),
                Operation::mov("b", "c"),
                Operation::mov("c", 1),
            ]
        );
    }

    #[test]
    fn chain_feeding_into_cycle() {
        // e reads a, which sits on the a <-> b cycle.
        let a = asn(&[("a", reg("b")), ("b", reg("a")), ("e", reg("a"))]);
        let ops = sort(&a);
        assert_eq!(ops, vec![Operation::mov("e", "a"), Operation::swap("a", "b")]);
        assert!(replays(&a, &ops));
    }

    #[test]
    fn disjoint_cycles() {
        let a = asn(&[
            ("a", reg("b")),
            ("b", reg("a")),
            ("c", reg("d")),
            ("d", reg("e")),
            ("e", reg("c")),
        ]);
        let ops = sort(&a);
        assert_eq!(
            ops,
            vec![
                Operation::swap("a", "b"),
                Operation::swap("c", "d"),
                Operation::swap("d", "e"),
            ]
        );
        assert!(replays(&a, &ops));
    }

    #[test]
    fn collapsed_destination_read_before_copy() {
        let a = asn(&[("a", Value::Int(1)), ("b", Value::Int(1)), ("c", reg("b"))]);
        let ops = sort(&a);
        assert_eq!(
            ops,
            vec![
                Operation::mov("a", 1),
                Operation::mov("c", "b"),
                Operation::mov("b", "a"),
            ]
        );
        assert!(replays(&a, &ops));
    }

    #[test]
    fn collapse_with_cycle() {
        let a = asn(&[
            ("a", Value::Int(5)),
            ("b", Value::Int(5)),
            ("c", reg("d")),
            ("d", reg("c")),
        ]);
        let ops = sort(&a);
        assert_eq!(
            ops,
            vec![
                Operation::mov("a", 5),
                Operation::swap("c", "d"),
                Operation::mov("b", "a"),
            ]
        );
    }

    #[test]
    fn unknown_destination_is_rejected() {
        let err = sequence(&asn(&[("z", Value::Int(1))]), REGS, SortOptions::default()).unwrap_err();
        match &err {
            Error::InvalidRegister { names, universe } => {
                assert_eq!(names, &vec!["z".to_string()]);
                assert_eq!(universe.len(), REGS.len());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains('z'));
    }

    #[test]
    fn unknown_self_assignment_is_rejected() {
        let a = asn(&[("z", reg("z")), ("y", Value::Int(0)), ("a", Value::Int(1))]);
        match sequence(&a, REGS, SortOptions::default()) {
            Err(Error::InvalidRegister { names, .. }) => assert_eq!(names, vec!["y", "z"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_source_name_is_opaque() {
        let ops = sort(&asn(&[("a", reg("rsp"))]));
        assert_eq!(ops, vec![Operation::mov("a", "rsp")]);
    }

    #[test]
    fn deterministic_without_randomize() {
        let a = asn(&[
            ("a", reg("b")),
            ("b", reg("c")),
            ("c", Value::Int(9)),
            ("d", Value::Int(9)),
            ("e", reg("f")),
            ("f", reg("e")),
        ]);
        let first = sort(&a);
        for _ in 0..10 {
            assert_eq!(sort(&a), first);
        }
    }

    #[test]
    fn randomized_runs_stay_correct() {
        let a = asn(&[
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
            ("c", reg("a")),
            ("d", reg("b")),
            ("e", reg("f")),
            ("f", reg("e")),
        ]);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut orders = HashSet::new();
        for _ in 0..200 {
            let ops = sequence_with_rng(&a, REGS, SortOptions::randomized(), &mut rng).unwrap();
            assert!(replays(&a, &ops), "bad order: {ops:?}");
            orders.insert(format!("{ops:?}"));
        }
        assert!(orders.len() > 1);
    }

    #[test]
    fn walk_bound_detects_broken_graph() {
        // b -> c -> b never returns to a; only reachable with a malformed graph.
        let (va, vb, vc) = (reg("b"), reg("c"), reg("b"));
        let graph: HashMap<&str, &Value> = [("a", &va), ("b", &vb), ("c", &vc)].into_iter().collect();
        assert!(matches!(
            extract_cycle("a", &graph, REGS),
            Err(Error::InternalConsistency(_))
        ));
    }

    #[test]
    fn walk_leaving_graph_is_not_a_cycle() {
        let va = reg("b");
        let vb = Value::Int(1);
        let graph: HashMap<&str, &Value> = [("a", &va), ("b", &vb)].into_iter().collect();
        assert_eq!(extract_cycle("a", &graph, REGS).unwrap(), None);
    }
}
