//! Links: symbolic bindings from input positions to output positions.
//!
//! A link names an output position (output id + path, optionally narrowed to
//! one collection element). When active it is subscribed to that position's
//! overlay; notifications route through the link for per-cycle dedup before
//! reaching the owning node.
//!
//! Reference handling:
//! - an input bound *through* a reference output (transparent deref) keeps a
//!   second subscription on the current deref target, refreshed whenever the
//!   reference re-ticks;
//! - a reference input bound to a non-reference output runs in notify-once
//!   mode: it fires exactly at its sample time (the binding instant) and
//!   stays silent afterwards.

use tickgraph_common::{EngineTime, GraphError, GraphErrorKind, ScalarValue, MIN_DT};
use tickgraph_types::{OutputKey, Path, PathSeg, TsKind, TsMeta, TsView};

use crate::graph::OutputsView;

/// The output position a link is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub output: OutputKey,
    pub path: Path,
}

impl LinkTarget {
    pub fn new(output: OutputKey) -> Self {
        Self { output, path: Path::new() }
    }

    pub fn at(output: OutputKey, path: impl IntoIterator<Item = PathSeg>) -> Self {
        Self { output, path: path.into_iter().collect() }
    }
}

#[derive(Debug)]
pub struct Link {
    pub(crate) target: Option<LinkTarget>,
    /// Subscription intent; preserved across bind/unbind.
    pub(crate) active: bool,
    /// Reference input peered to a non-reference output: fire once at the
    /// binding tick, then stay silent.
    pub(crate) notify_once: bool,
    /// Bound through a reference output; carries a second subscription on
    /// the current deref target.
    pub(crate) deref_mode: bool,
    pub(crate) deref: Option<LinkTarget>,
    pub(crate) sample_time: EngineTime,
    pub(crate) notify_time: EngineTime,
    /// Narrow the subscription to one element of a list target.
    pub(crate) element_index: Option<u32>,
    pub(crate) input_meta: &'static TsMeta,
}

impl Link {
    pub fn new(input_meta: &'static TsMeta) -> Self {
        Self {
            target: None,
            active: false,
            notify_once: false,
            deref_mode: false,
            deref: None,
            sample_time: MIN_DT,
            notify_time: MIN_DT,
            element_index: None,
            input_meta,
        }
    }

    #[inline]
    pub fn bound(&self) -> bool {
        self.target.is_some()
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn notify_once(&self) -> bool {
        self.notify_once
    }

    #[inline]
    pub fn sample_time(&self) -> EngineTime {
        self.sample_time
    }

    #[inline]
    pub fn sampled_at(&self, time: EngineTime) -> bool {
        self.sample_time == time
    }

    #[inline]
    pub fn element_index(&self) -> Option<u32> {
        self.element_index
    }

    #[inline]
    pub fn is_element_binding(&self) -> bool {
        self.element_index.is_some()
    }

    /// The overlay position the subscription attaches to.
    pub(crate) fn subscription_path(&self) -> Option<Path> {
        let target = self.target.as_ref()?;
        let mut path = target.path.clone();
        if let Some(i) = self.element_index {
            path.push(PathSeg::Item(i));
        }
        Some(path)
    }

    /// Per-cycle notification gate. Returns true when the owning node
    /// should be scheduled; updates the dedup stamp.
    pub(crate) fn accept_notification(&mut self, time: EngineTime) -> bool {
        if !self.active {
            return false;
        }
        if self.notify_once && self.sample_time != time {
            return false;
        }
        if self.notify_time == time {
            return false;
        }
        self.notify_time = time;
        true
    }
}

/// Resolve a link to a read view of its (possibly dereferenced) target.
pub(crate) fn resolve_link<'a>(
    outputs: OutputsView<'a>,
    link: &Link,
    time: EngineTime,
) -> Result<TsView<'a>, GraphError> {
    let target = link
        .target
        .as_ref()
        .ok_or_else(|| GraphError::new(GraphErrorKind::UnboundReference).with_message("unbound input"))?;
    let mut view = outputs.get(target.output)?.view(time).at_path(&target.path)?;

    // Transparent dereference: follow reference outputs until a concrete
    // position, unless the input itself wants the reference.
    if link.input_meta.kind != TsKind::Ref {
        let mut hops = 0;
        while view.kind() == TsKind::Ref {
            hops += 1;
            if hops > 8 {
                return Err(GraphError::new(GraphErrorKind::UnboundReference)
                    .with_message("reference chain too deep"));
            }
            let r = view.ref_value()?;
            let (output, path) = r.target().ok_or_else(|| {
                GraphError::new(GraphErrorKind::UnboundReference)
                    .with_message("empty reference")
            })?;
            let path: Path = path.iter().copied().collect();
            view = outputs.get(output)?.view(time).at_path(&path)?;
        }
    }

    if let Some(i) = link.element_index {
        view = view.item(i as usize)?;
    }
    Ok(view)
}

/// Where an input position gets its data from.
#[derive(Debug)]
pub enum InputBinding {
    /// Declared but never wired. Reads are invalid.
    Unbound(&'static TsMeta),
    /// Peered to an external output through the node's link table.
    Link(u32),
    /// Composite input wired field-by-field.
    Fields(&'static TsMeta, Vec<InputBinding>),
}

enum Source<'a> {
    Binding(&'a InputBinding),
    /// Navigation descended inside a linked output.
    View(TsView<'a>),
}

/// Read view of one input position. Navigation is transparent across links:
/// descending through a peered position continues inside the linked
/// output's data.
pub struct InputView<'a> {
    outputs: OutputsView<'a>,
    links: &'a [Link],
    meta: &'static TsMeta,
    time: EngineTime,
    source: Source<'a>,
}

impl<'a> InputView<'a> {
    pub(crate) fn new(
        outputs: OutputsView<'a>,
        links: &'a [Link],
        meta: &'static TsMeta,
        time: EngineTime,
        binding: &'a InputBinding,
    ) -> Self {
        Self {
            outputs,
            links,
            meta,
            time,
            source: Source::Binding(binding),
        }
    }

    #[inline]
    pub fn meta(&self) -> &'static TsMeta {
        self.meta
    }

    #[inline]
    pub fn kind(&self) -> TsKind {
        self.meta.kind
    }

    pub fn bound(&self) -> bool {
        match &self.source {
            Source::Binding(InputBinding::Unbound(_)) => false,
            Source::Binding(InputBinding::Link(idx)) => self.links[*idx as usize].bound(),
            Source::Binding(InputBinding::Fields(_, children)) => !children.is_empty(),
            Source::View(_) => true,
        }
    }

    pub fn active(&self) -> bool {
        match &self.source {
            Source::Binding(InputBinding::Link(idx)) => self.links[*idx as usize].active(),
            Source::Binding(InputBinding::Fields(_, children)) => children.iter().any(|c| {
                self.child_view(c).active()
            }),
            _ => false,
        }
    }

    fn child_view<'b>(&'b self, binding: &'b InputBinding) -> InputView<'b> {
        let meta = match binding {
            InputBinding::Unbound(m) | InputBinding::Fields(m, _) => m,
            InputBinding::Link(idx) => self.links[*idx as usize].input_meta,
        };
        InputView {
            outputs: self.outputs,
            links: self.links,
            meta,
            time: self.time,
            source: Source::Binding(binding),
        }
    }

    fn link(&self) -> Option<&'a Link> {
        match &self.source {
            Source::Binding(InputBinding::Link(idx)) => Some(&self.links[*idx as usize]),
            _ => None,
        }
    }

    /* ── modification state ── */

    pub fn modified(&self) -> bool {
        match &self.source {
            Source::Binding(InputBinding::Unbound(_)) => false,
            Source::Binding(InputBinding::Link(idx)) => {
                let link = &self.links[*idx as usize];
                if link.notify_once {
                    return link.sampled_at(self.time);
                }
                if link.sampled_at(self.time) {
                    return true;
                }
                resolve_link(self.outputs, link, self.time)
                    .map(|v| v.modified())
                    .unwrap_or(false)
            }
            Source::Binding(InputBinding::Fields(_, children)) => {
                children.iter().any(|c| self.child_view(c).modified())
            }
            Source::View(v) => v.modified(),
        }
    }

    pub fn valid(&self) -> bool {
        match &self.source {
            Source::Binding(InputBinding::Unbound(_)) => false,
            Source::Binding(InputBinding::Link(idx)) => {
                let link = &self.links[*idx as usize];
                if link.notify_once {
                    return link.sample_time != MIN_DT;
                }
                resolve_link(self.outputs, link, self.time)
                    .map(|v| v.valid())
                    .unwrap_or(false)
            }
            Source::Binding(InputBinding::Fields(_, children)) => {
                children.iter().any(|c| self.child_view(c).valid())
            }
            Source::View(v) => v.valid(),
        }
    }

    pub fn all_valid(&self) -> bool {
        match &self.source {
            Source::Binding(InputBinding::Unbound(_)) => false,
            Source::Binding(InputBinding::Link(_)) => self
                .resolve()
                .map(|v| v.all_valid())
                .unwrap_or(false),
            Source::Binding(InputBinding::Fields(_, children)) => {
                !children.is_empty() && children.iter().all(|c| self.child_view(c).all_valid())
            }
            Source::View(v) => v.all_valid(),
        }
    }

    pub fn last_modified_time(&self) -> EngineTime {
        match &self.source {
            Source::Binding(InputBinding::Unbound(_)) => MIN_DT,
            Source::Binding(InputBinding::Link(idx)) => {
                let link = &self.links[*idx as usize];
                let underlying = resolve_link(self.outputs, link, self.time)
                    .map(|v| v.last_modified_time())
                    .unwrap_or(MIN_DT);
                underlying.max(link.sample_time)
            }
            Source::Binding(InputBinding::Fields(_, children)) => children
                .iter()
                .map(|c| self.child_view(c).last_modified_time())
                .max()
                .unwrap_or(MIN_DT),
            Source::View(v) => v.last_modified_time(),
        }
    }

    /* ── value access ── */

    fn resolve(&self) -> Result<TsView<'a>, GraphError> {
        match &self.source {
            Source::Binding(InputBinding::Link(idx)) => {
                resolve_link(self.outputs, &self.links[*idx as usize], self.time)
            }
            Source::Binding(InputBinding::Unbound(_)) => {
                Err(GraphError::new(GraphErrorKind::UnboundReference)
                    .with_message("input is not wired"))
            }
            Source::Binding(InputBinding::Fields(..)) => {
                Err(GraphError::new(GraphErrorKind::TypeMismatch)
                    .with_message("composite input has no single backing view"))
            }
            Source::View(v) => Ok(v.clone()),
        }
    }

    /// The resolved read view. Signals expose tick state only.
    pub fn view(&self) -> Result<TsView<'a>, GraphError> {
        if self.meta.kind == TsKind::Signal {
            return Err(GraphError::not_capable("signal carries no value"));
        }
        self.resolve()
    }

    pub fn scalar(&self) -> Result<&'a ScalarValue, GraphError> {
        self.view()?.scalar()
    }

    /// The peered target of a reference input.
    pub fn ref_target(&self) -> Result<LinkTarget, GraphError> {
        let link = self.link().ok_or_else(|| {
            GraphError::new(GraphErrorKind::UnboundReference).with_message("not a peered input")
        })?;
        link.target
            .clone()
            .ok_or_else(|| GraphError::new(GraphErrorKind::UnboundReference))
    }

    /* ── navigation ── */

    pub fn field(&self, name: &str) -> Result<InputView<'_>, GraphError> {
        match &self.source {
            Source::Binding(InputBinding::Fields(meta, children)) => {
                let idx = meta.field_index(name).ok_or_else(|| {
                    GraphError::new(GraphErrorKind::NotFound)
                        .with_message(format!("no field {name} on {}", meta.name))
                })?;
                Ok(self.child_view(&children[idx]))
            }
            _ => {
                let v = self.resolve()?.field(name)?;
                Ok(InputView {
                    outputs: self.outputs,
                    links: self.links,
                    meta: v.meta(),
                    time: self.time,
                    source: Source::View(v),
                })
            }
        }
    }

    pub fn item(&self, index: usize) -> Result<InputView<'_>, GraphError> {
        match &self.source {
            Source::Binding(InputBinding::Fields(_, children)) => children
                .get(index)
                .map(|c| self.child_view(c))
                .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound)),
            _ => {
                let v = self.resolve()?.item(index)?;
                Ok(InputView {
                    outputs: self.outputs,
                    links: self.links,
                    meta: v.meta(),
                    time: self.time,
                    source: Source::View(v),
                })
            }
        }
    }
}
