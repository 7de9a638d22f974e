use serde::Serialize;

use crate::calendar::{days_between, DayKey, HALF_HOUR_MS};
use crate::model::*;

/// Shortest height an appointment is drawn with. Overlap tests use the same
/// floor so that lanes match what is on screen.
pub const MIN_RENDERED_DURATION_MS: Ms = HALF_HOUR_MS;

/// One laid-out entry: lane index and number of lanes (or, for all-day
/// entries, day columns) it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayoutNode {
    #[serde(flatten)]
    pub entry: Entry,
    pub level: u32,
    pub width: u32,
}

impl LayoutNode {
    fn new(entry: Entry, width: u32) -> Self {
        Self {
            entry,
            level: 0,
            width,
        }
    }
}

/// Lane assignment for one day column, or for the all-day row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DayLayout {
    /// Nodes ordered by level; equal levels keep placement order.
    pub nodes: Vec<LayoutNode>,
    pub max_level: u32,
}

impl DayLayout {
    pub fn node(&self, id: ulid::Ulid) -> Option<&LayoutNode> {
        self.nodes.iter().find(|n| n.entry.id == id)
    }

    /// Number of lanes in use.
    pub fn lanes(&self) -> u32 {
        if self.nodes.is_empty() { 0 } else { self.max_level + 1 }
    }
}

/// `span` with its end pushed out to the minimum rendered duration.
pub fn effective_span(span: Span) -> Span {
    if span.duration_ms() < MIN_RENDERED_DURATION_MS {
        Span::new(span.start, span.start + MIN_RENDERED_DURATION_MS)
    } else {
        span
    }
}

/// How a placed node's range is compared against a newcomer's start.
#[derive(Clone, Copy)]
enum Containment {
    /// `[start, end)`: timed appointments.
    HalfOpen,
    /// `[start, end]`: all-day entries compared by date.
    Inclusive,
}

/// Level for a newcomer starting at `start`, scanning `placed` in order.
///
/// Every placed node whose range holds `start` bumps the level by one. The
/// scan stops at the first node already over by `start` unless the next node
/// sits on the level reached so far.
fn level_for(
    placed: &[LayoutNode],
    start: i64,
    bounds: impl Fn(&LayoutNode) -> (i64, i64),
    containment: Containment,
) -> u32 {
    let mut level = 0;
    for (i, node) in placed.iter().enumerate() {
        let (node_start, node_end) = bounds(node);
        let holds = match containment {
            Containment::HalfOpen => node_start <= start && start < node_end,
            Containment::Inclusive => node_start <= start && start <= node_end,
        };
        if holds {
            level += 1;
        }
        let next_on_level = placed.get(i + 1).is_some_and(|next| next.level == level);
        if start >= node_end && !next_on_level {
            break;
        }
    }
    level
}

/// Insert after every node whose level is `<=` the new node's level.
fn insert_by_level(placed: &mut Vec<LayoutNode>, node: LayoutNode) {
    let pos = placed.partition_point(|n| n.level <= node.level);
    placed.insert(pos, node);
}

/// First pass for timed entries. `sorted` must be in start/longest order.
pub fn assign_levels(sorted: &[Entry]) -> DayLayout {
    let mut layout = DayLayout::default();
    for &entry in sorted {
        let level = level_for(
            &layout.nodes,
            entry.span.start,
            |n| (n.entry.span.start, effective_span(n.entry.span).end),
            Containment::HalfOpen,
        );
        layout.max_level = layout.max_level.max(level);
        insert_by_level(&mut layout.nodes, LayoutNode { level, ..LayoutNode::new(entry, 1) });
    }
    layout
}

/// Second pass: widen each node across free lanes above it.
///
/// A node grows by one for every higher level it meets without a conflict,
/// and is capped at the gap to the first higher-level node it overlaps.
pub fn assign_widths(layout: &mut DayLayout) {
    let widths: Vec<u32> = layout
        .nodes
        .iter()
        .map(|node| width_for(node, &layout.nodes))
        .collect();
    for (node, width) in layout.nodes.iter_mut().zip(widths) {
        node.width = width;
    }
}

fn width_for(node: &LayoutNode, nodes: &[LayoutNode]) -> u32 {
    let current = effective_span(node.entry.span);
    let mut width = 1;
    let mut level_found_space = node.level;

    for other in nodes {
        if other.level <= node.level {
            continue;
        }
        let span = effective_span(other.entry.span);
        let start_inside = current.start >= span.start && current.start < span.end;
        let end_inside = current.end > span.start && current.end < span.end;
        let covers = current.start <= span.start && current.end >= span.end;
        if start_inside || end_inside || covers {
            return other.level - node.level;
        }
        if level_found_space < other.level {
            level_found_space = other.level;
            width += 1;
        }
    }
    width
}

/// Both passes for one day column.
pub fn layout_day(sorted: &[Entry]) -> DayLayout {
    let mut layout = assign_levels(sorted);
    assign_widths(&mut layout);
    layout
}

/// Lane assignment for the all-day row.
///
/// Ranges are compared by whole dates with an inclusive end. Each node's
/// width is the number of day columns it covers, never less than one.
pub fn layout_blockers(sorted: &[Entry]) -> DayLayout {
    let days = |span: &Span| (DayKey::of(span.start), DayKey::of(span.end));
    let mut layout = DayLayout::default();
    for &entry in sorted {
        let (start, end) = days(&entry.span);
        let width = u32::try_from(days_between(end, start).max(1)).unwrap_or(u32::MAX);
        let level = level_for(
            &layout.nodes,
            start.days(),
            |n| {
                let (s, e) = days(&n.entry.span);
                (s.days(), e.days())
            },
            Containment::Inclusive,
        );
        layout.max_level = layout.max_level.max(level);
        insert_by_level(&mut layout.nodes, LayoutNode { level, ..LayoutNode::new(entry, width) });
    }
    layout
}
