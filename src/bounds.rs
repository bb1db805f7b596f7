//! Pure nested-set arithmetic.
//!
//! Nothing here touches the database: the repository asks these helpers where a
//! node goes and which ranges must shift, then turns the answers into SQL.

use serde::{Deserialize, Serialize};

use crate::error::NestedSetError;

/// Largest value a `lft`/`rgt` bound may take.
pub const MAX_BOUND: i64 = u32::MAX as i64;

/// Largest value a `level` may take.
pub const MAX_LEVEL: i32 = u16::MAX as i32;

/// Interval and depth of one node inside its tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub lft: i64,
    pub rgt: i64,
    pub level: i32,
}

impl Bounds {
    pub fn new(lft: i64, rgt: i64, level: i32) -> Self {
        Self { lft, rgt, level }
    }

    /// Bounds of a freshly created root.
    pub fn root() -> Self {
        Self::new(1, 2, 0)
    }

    /// `rgt - lft + 1`: two bounds for every node of the subtree.
    pub fn width(&self) -> i64 {
        self.rgt - self.lft + 1
    }

    pub fn descendant_count(&self) -> i64 {
        (self.rgt - self.lft - 1) / 2
    }

    pub fn is_leaf(&self) -> bool {
        self.rgt - self.lft == 1
    }

    /// Strict interval containment. Callers are responsible for comparing roots.
    pub fn is_ancestor_of(&self, other: &Bounds) -> bool {
        self.lft < other.lft && self.rgt > other.rgt
    }

    /// Whether `other` is this node or lies inside its subtree.
    pub fn contains_or_is(&self, other: &Bounds) -> bool {
        self.lft <= other.lft && self.rgt >= other.rgt
    }
}

/// Where a node goes, relative to an anchor node.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Placement<Id> {
    FirstChildOf(Id),
    LastChildOf(Id),
    Before(Id),
    After(Id),
}

impl<Id> Placement<Id> {
    pub fn anchor(&self) -> &Id {
        match self {
            Placement::FirstChildOf(id)
            | Placement::LastChildOf(id)
            | Placement::Before(id)
            | Placement::After(id) => id,
        }
    }

    /// Whether the anchor becomes the parent (as opposed to a sibling).
    pub fn is_child_placement(&self) -> bool {
        matches!(self, Placement::FirstChildOf(_) | Placement::LastChildOf(_))
    }

    pub(crate) fn kind(&self) -> PlacementKind {
        match self {
            Placement::FirstChildOf(_) => PlacementKind::FirstChild,
            Placement::LastChildOf(_) => PlacementKind::LastChild,
            Placement::Before(_) => PlacementKind::Before,
            Placement::After(_) => PlacementKind::After,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum PlacementKind {
    FirstChild,
    LastChild,
    Before,
    After,
}

/// How [`delete_node`](crate::NestedSetRepository::delete_node) treats descendants.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeleteMode {
    /// Remove the node together with every descendant.
    #[default]
    Subtree,
    /// Remove the node only if it has no children.
    LeafOnly,
    /// Remove the node and lift its children one level into its place.
    PromoteChildren,
}

/// Open (positive `delta`) or close (negative `delta`) a gap: every bound
/// `>= from` moves by `delta`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Shift {
    pub from: i64,
    pub delta: i64,
}

impl Shift {
    pub fn open(at: i64, width: i64) -> Self {
        Self {
            from: at,
            delta: width,
        }
    }

    /// Close the gap left by a span ending at `rgt`.
    pub fn close(rgt: i64, width: i64) -> Self {
        Self {
            from: rgt + 1,
            delta: -width,
        }
    }

    pub fn apply(&self, value: i64) -> i64 {
        if value >= self.from {
            value + self.delta
        } else {
            value
        }
    }
}

/// Target `lft` and level for a node placed relative to `anchor`.
pub(crate) fn insertion_point(anchor: &Bounds, kind: PlacementKind) -> (i64, i32) {
    match kind {
        PlacementKind::FirstChild => (anchor.lft + 1, anchor.level + 1),
        PlacementKind::LastChild => (anchor.rgt, anchor.level + 1),
        PlacementKind::Before => (anchor.lft, anchor.level),
        PlacementKind::After => (anchor.rgt + 1, anchor.level),
    }
}

/// Offsets applied to a subtree moved within one tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct MovePlan {
    /// Gap opened at the insertion point.
    pub open: Shift,
    /// Subtree span after the gap has been opened.
    pub span: (i64, i64),
    /// Added to `lft`/`rgt` of every moved node.
    pub offset: i64,
    /// Added to `level` of every moved node.
    pub level_delta: i32,
    /// Gap left behind once the subtree has been relocated.
    pub close: Shift,
}

impl MovePlan {
    /// Plan a move of `node` so that it starts at `to` with level `level`,
    /// both computed against the tree before any shift.
    pub fn within_tree(node: &Bounds, to: i64, level: i32) -> Self {
        let width = node.width();
        let open = Shift::open(to, width);
        let (lft, rgt) = (open.apply(node.lft), open.apply(node.rgt));
        // `to` sits outside the subtree, so the gap never lands inside the moved span.
        Self {
            open,
            span: (lft, rgt),
            offset: to - lft,
            level_delta: level - node.level,
            close: Shift::close(rgt, width),
        }
    }

    /// True when the move would leave every bound where it already is.
    pub fn is_noop(node: &Bounds, to: i64, level: i32) -> bool {
        level == node.level && (to == node.lft || to == node.rgt + 1)
    }
}

/// Reject results outside the unsigned 32-bit bound / 16-bit level ranges.
pub(crate) fn ensure_capacity(max_rgt: i64, max_level: i32) -> Result<(), NestedSetError> {
    if max_rgt > MAX_BOUND {
        return Err(NestedSetError::CapacityExceeded(format!(
            "rgt would reach {max_rgt}, above {MAX_BOUND}"
        )));
    }
    if max_level > MAX_LEVEL {
        return Err(NestedSetError::CapacityExceeded(format!(
            "level would reach {max_level}, above {MAX_LEVEL}"
        )));
    }
    Ok(())
}

/// Enforce a structure's `max_levels`, which counts levels from the root's
/// level 0: `Some(2)` admits levels 0 and 1.
pub(crate) fn ensure_depth(level: i32, max_levels: Option<i32>) -> Result<(), NestedSetError> {
    match max_levels {
        Some(max) if max > 0 && level >= max => Err(NestedSetError::DepthExceeded {
            level,
            max_levels: max,
        }),
        _ => Ok(()),
    }
}

/// Check the nested-set invariants of one whole tree.
///
/// `nodes` must hold every node of a single root, in any order.
pub fn check_tree(nodes: &[Bounds]) -> Result<(), String> {
    if nodes.is_empty() {
        return Ok(());
    }

    let mut sorted = nodes.to_vec();
    sorted.sort_by_key(|bounds| bounds.lft);

    let mut seen = Vec::with_capacity(sorted.len() * 2);
    for bounds in &sorted {
        if bounds.lft >= bounds.rgt {
            return Err(format!("node {bounds:?} has lft >= rgt"));
        }
        if bounds.width() % 2 != 0 {
            return Err(format!("node {bounds:?} has an odd width"));
        }
        seen.push(bounds.lft);
        seen.push(bounds.rgt);
    }
    seen.sort_unstable();
    for (expected, actual) in (1..).zip(seen.iter()) {
        if *actual != expected {
            return Err(format!("bounds are not contiguous: expected {expected}, found {actual}"));
        }
    }

    let root = sorted[0];
    if root.lft != 1 || root.rgt != (sorted.len() as i64) * 2 {
        return Err(format!("root {root:?} does not span the whole tree"));
    }

    let mut stack: Vec<Bounds> = Vec::new();
    for bounds in &sorted {
        while let Some(top) = stack.last() {
            if top.rgt < bounds.lft {
                stack.pop();
            } else {
                break;
            }
        }
        match stack.last() {
            Some(parent) => {
                if !parent.is_ancestor_of(bounds) {
                    return Err(format!("{bounds:?} partially overlaps {parent:?}"));
                }
                if bounds.level != parent.level + 1 {
                    return Err(format!(
                        "{bounds:?} sits at level {} under parent level {}",
                        bounds.level, parent.level
                    ));
                }
            }
            None => {
                if bounds.lft != root.lft || bounds.level != 0 {
                    return Err(format!("{bounds:?} lies outside the root"));
                }
            }
        }
        stack.push(*bounds);
    }

    for bounds in &sorted {
        let descendants = sorted
            .iter()
            .filter(|other| bounds.is_ancestor_of(other))
            .count() as i64;
        if bounds.rgt - bounds.lft != 2 * descendants + 1 {
            return Err(format!(
                "{bounds:?} claims {} descendants but has {descendants}",
                bounds.descendant_count()
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// R[1,10] -> A[2,7] -> (A1[3,4], A2[5,6]); B[8,9]
    fn sample() -> Vec<Bounds> {
        vec![
            Bounds::new(1, 10, 0),
            Bounds::new(2, 7, 1),
            Bounds::new(3, 4, 2),
            Bounds::new(5, 6, 2),
            Bounds::new(8, 9, 1),
        ]
    }

    fn apply_move(nodes: &mut [Bounds], plan: &MovePlan) {
        for bounds in nodes.iter_mut() {
            bounds.lft = plan.open.apply(bounds.lft);
            bounds.rgt = plan.open.apply(bounds.rgt);
        }
        for bounds in nodes.iter_mut() {
            if bounds.lft >= plan.span.0 && bounds.lft <= plan.span.1 {
                bounds.lft += plan.offset;
                bounds.rgt += plan.offset;
                bounds.level += plan.level_delta;
            }
        }
        for bounds in nodes.iter_mut() {
            bounds.lft = plan.close.apply(bounds.lft);
            bounds.rgt = plan.close.apply(bounds.rgt);
        }
    }

    #[test]
    fn width_and_descendants() {
        let root = Bounds::new(1, 10, 0);
        assert_eq!(root.width(), 10);
        assert_eq!(root.descendant_count(), 4);
        assert!(Bounds::new(3, 4, 2).is_leaf());
        assert!(root.is_ancestor_of(&Bounds::new(3, 4, 2)));
        assert!(!root.is_ancestor_of(&root));
        assert!(root.contains_or_is(&root));
    }

    #[test]
    fn insertion_points_follow_anchor() {
        let parent = Bounds::new(2, 7, 1);
        assert_eq!(insertion_point(&parent, PlacementKind::FirstChild), (3, 2));
        assert_eq!(insertion_point(&parent, PlacementKind::LastChild), (7, 2));
        assert_eq!(insertion_point(&parent, PlacementKind::Before), (2, 1));
        assert_eq!(insertion_point(&parent, PlacementKind::After), (8, 1));
    }

    #[test]
    fn before_first_child_matches_prepend() {
        let parent = Bounds::new(2, 7, 1);
        let first = Bounds::new(3, 4, 2);
        assert_eq!(
            insertion_point(&parent, PlacementKind::FirstChild),
            insertion_point(&first, PlacementKind::Before)
        );
    }

    #[test]
    fn shift_only_moves_bounds_at_or_after_pivot() {
        let shift = Shift::open(7, 2);
        assert_eq!(shift.apply(6), 6);
        assert_eq!(shift.apply(7), 9);
        let close = Shift::close(7, 6);
        assert_eq!(close.apply(7), 7);
        assert_eq!(close.apply(8), 2);
    }

    #[test]
    fn moving_subtree_after_sibling_keeps_tree_valid() {
        let mut nodes = sample();
        let node = nodes[1];
        let (to, level) = insertion_point(&nodes[4], PlacementKind::After);
        let plan = MovePlan::within_tree(&node, to, level);
        apply_move(&mut nodes, &plan);

        check_tree(&nodes).expect("tree stays valid");
        assert_eq!(nodes[4], Bounds::new(2, 3, 1));
        assert_eq!(nodes[1], Bounds::new(4, 9, 1));
        assert_eq!(nodes[2], Bounds::new(5, 6, 2));
    }

    #[test]
    fn moving_subtree_deeper_adjusts_levels() {
        let mut nodes = sample();
        let node = nodes[1];
        let (to, level) = insertion_point(&nodes[4], PlacementKind::LastChild);
        let plan = MovePlan::within_tree(&node, to, level);
        apply_move(&mut nodes, &plan);

        check_tree(&nodes).expect("tree stays valid");
        assert_eq!(nodes[4], Bounds::new(2, 9, 1));
        assert_eq!(nodes[1], Bounds::new(3, 8, 2));
        assert_eq!(nodes[3], Bounds::new(6, 7, 3));
    }

    #[test]
    fn moving_to_current_position_is_noop() {
        let nodes = sample();
        let (to, level) = insertion_point(&nodes[0], PlacementKind::FirstChild);
        assert!(MovePlan::is_noop(&nodes[1], to, level));
        let (to, level) = insertion_point(&nodes[4], PlacementKind::Before);
        assert!(MovePlan::is_noop(&nodes[1], to, level));
        let (to, level) = insertion_point(&nodes[4], PlacementKind::After);
        assert!(!MovePlan::is_noop(&nodes[1], to, level));
    }

    #[test]
    fn depth_counts_root_level() {
        assert!(ensure_depth(1, Some(2)).is_ok());
        assert!(matches!(
            ensure_depth(2, Some(2)),
            Err(NestedSetError::DepthExceeded { level: 2, max_levels: 2 })
        ));
        assert!(ensure_depth(500, None).is_ok());
        assert!(ensure_depth(500, Some(0)).is_ok());
    }

    #[test]
    fn capacity_limits() {
        assert!(ensure_capacity(MAX_BOUND, MAX_LEVEL).is_ok());
        assert!(matches!(
            ensure_capacity(MAX_BOUND + 1, 0),
            Err(NestedSetError::CapacityExceeded(_))
        ));
        assert!(matches!(
            ensure_capacity(4, MAX_LEVEL + 1),
            Err(NestedSetError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn check_tree_rejects_overlap_and_gaps() {
        assert!(check_tree(&sample()).is_ok());

        let overlapping = vec![
            Bounds::new(1, 6, 0),
            Bounds::new(2, 4, 1),
            Bounds::new(3, 5, 1),
        ];
        assert!(check_tree(&overlapping).is_err());

        let gap = vec![Bounds::new(1, 6, 0), Bounds::new(2, 3, 1)];
        assert!(check_tree(&gap).is_err());

        let wrong_level = vec![Bounds::new(1, 4, 0), Bounds::new(2, 3, 2)];
        assert!(check_tree(&wrong_level).is_err());
    }
}
