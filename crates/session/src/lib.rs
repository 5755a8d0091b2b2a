//! Interaction state machine for the planner client.
//!
//! [`Session`] orchestrates user actions (upload, point query, best-point
//! search, reset) against a query service that allows at most one request in
//! flight. It is deliberately free of I/O: every event method consumes a
//! user action or a service response and returns the [`Command`] effects the
//! host must perform (send a request, redraw a layer, notify the user).
//! This keeps the whole machine deterministic and testable without a
//! browser or a server.
//!
//! Key properties:
//! - Triggers while a request is in flight return no effects at all.
//! - Every request carries a monotonically increasing sequence number;
//!   completions (success, failure, timeout) for a superseded sequence are
//!   discarded, so a response that straggles in after its timeout cannot
//!   corrupt the view.
//! - Failures revert to the pre-request state; the machine never enters
//!   `Displayed` on a failure path.

use geometry::{CanonicalPoint, DisplayPoint, Extent, GeometryError, fit_to_bound, to_canonical};
use protocol::{GridPoint, ServiceConfig};

pub const DEFAULT_MAX_DISPLAY_EDGE: u32 = 512;
pub const DEFAULT_QUERY_TIMEOUT_MS: u32 = 30_000;
pub const DEFAULT_SAMPLE_COUNT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub service: ServiceConfig,
    /// Longest display edge the floorplan is fitted into.
    pub max_display_edge: u32,
    /// A request unanswered for this long reverts to the previous state.
    pub query_timeout_ms: u32,
}

impl SessionConfig {
    pub fn new(service: ServiceConfig) -> Self {
        Self {
            service,
            max_display_edge: DEFAULT_MAX_DISPLAY_EDGE,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }
}

/// Sequence number of an issued request. Monotonic per session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestSeq(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No floorplan loaded.
    Empty,
    /// Floorplan loaded, no result shown.
    Ready,
    /// A request is in flight; all triggers are refused.
    Querying,
    /// Overlay and marker shown for the latest completed query.
    Displayed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    UploadFailed(String),
    QueryFailed(String),
    BestPointFailed(String),
    QueryTimedOut,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::UploadFailed(detail) => write!(f, "upload failed: {detail}"),
            SessionError::QueryFailed(detail) => write!(f, "query failed: {detail}"),
            SessionError::BestPointFailed(detail) => {
                write!(f, "best-point search failed: {detail}")
            }
            SessionError::QueryTimedOut => write!(f, "query timed out"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Effects the host performs in order after each event.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Command {
    /// POST the canonical point to the point-query endpoint.
    SendPointQuery { seq: RequestSeq, point: CanonicalPoint },
    /// POST a best-point search.
    SendBestPointQuery { seq: RequestSeq, sample_count: u32 },
    /// Redraw the base layer from the current floorplan.
    RedrawBase,
    /// Install the result image as the overlay and redraw with the marker.
    InstallOverlay {
        image: Vec<u8>,
        marker: CanonicalPoint,
    },
    /// Drop the overlay resource and redraw an empty overlay layer.
    ClearOverlay,
    /// Surface a user-visible error.
    Notify { error: SessionError },
}

/// The loaded floorplan: encoded image bytes plus both extents.
///
/// Set once per upload; replaced wholesale by the next upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Floorplan {
    pub image: Vec<u8>,
    pub canonical: Extent,
    pub display: Extent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum QueryKind {
    /// User clicked; the service echoes the queried point, so the marker is
    /// the click itself.
    Point { clicked: CanonicalPoint },
    /// Best-point search; answered with a grid point, not an image.
    BestPoint,
    /// Implicit point query at the found best point.
    BestPointFollowUp { best: GridPoint },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Inflight {
    seq: RequestSeq,
    kind: QueryKind,
}

/// The interaction controller.
///
/// Field invariants (enforced by the event methods):
/// - `inflight` and `marker` are only ever set while `floorplan` is set.
/// - `marker` present means the matching overlay is installed host-side;
///   there is exactly one current overlay/marker pair.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    floorplan: Option<Floorplan>,
    marker: Option<CanonicalPoint>,
    inflight: Option<Inflight>,
    next_seq: u64,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            floorplan: None,
            marker: None,
            inflight: None,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        if self.floorplan.is_none() {
            Phase::Empty
        } else if self.inflight.is_some() {
            Phase::Querying
        } else if self.marker.is_some() {
            Phase::Displayed
        } else {
            Phase::Ready
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn floorplan(&self) -> Option<&Floorplan> {
        self.floorplan.as_ref()
    }

    pub fn marker(&self) -> Option<CanonicalPoint> {
        self.marker
    }

    /// A floorplan upload completed; replaces any previous floorplan and
    /// clears the shown result. Refused while a query is in flight.
    pub fn upload_succeeded(
        &mut self,
        image: Vec<u8>,
        canonical: Extent,
    ) -> Result<Vec<Command>, GeometryError> {
        if self.inflight.is_some() {
            return Ok(Vec::new());
        }
        let display = fit_to_bound(canonical, self.config.max_display_edge)?;
        self.floorplan = Some(Floorplan {
            image,
            canonical,
            display,
        });
        self.marker = None;
        Ok(vec![Command::RedrawBase, Command::ClearOverlay])
    }

    /// A floorplan upload failed; state is unchanged.
    pub fn upload_failed(&mut self, detail: impl Into<String>) -> Vec<Command> {
        vec![Command::Notify {
            error: SessionError::UploadFailed(detail.into()),
        }]
    }

    /// User clicked the base layer at a display-space position.
    ///
    /// Ignored while `Empty` or `Querying`. Otherwise maps the click to its
    /// canonical pixel and issues a point query.
    pub fn click(&mut self, point: DisplayPoint) -> Vec<Command> {
        if self.inflight.is_some() {
            return Vec::new();
        }
        let Some(plan) = &self.floorplan else {
            return Vec::new();
        };
        let Ok(clicked) = to_canonical(point, plan.canonical, plan.display) else {
            // Unreachable once a floorplan is loaded: both extents were
            // validated by fit_to_bound.
            return Vec::new();
        };
        let seq = self.issue(QueryKind::Point { clicked });
        vec![Command::SendPointQuery {
            seq,
            point: clicked,
        }]
    }

    /// User asked for the best transmitter placement.
    pub fn find_best(&mut self, sample_count: u32) -> Vec<Command> {
        if self.inflight.is_some() || self.floorplan.is_none() {
            return Vec::new();
        }
        let seq = self.issue(QueryKind::BestPoint);
        vec![Command::SendBestPointQuery { seq, sample_count }]
    }

    /// A point query answered with the rendered field image.
    ///
    /// Enters `Displayed` with the marker at the queried point (the click
    /// for a user query, the found optimum for a best-point follow-up).
    pub fn point_query_succeeded(&mut self, seq: RequestSeq, overlay: Vec<u8>) -> Vec<Command> {
        let Some(kind) = self.complete(seq) else {
            return Vec::new();
        };
        let marker = match kind {
            QueryKind::Point { clicked } => clicked,
            QueryKind::BestPointFollowUp { best } => CanonicalPoint::new(best.col, best.row),
            // A best-point search answers with JSON, never an image; treat a
            // mismatched completion as stale.
            QueryKind::BestPoint => return Vec::new(),
        };
        self.marker = Some(marker);
        vec![Command::InstallOverlay {
            image: overlay,
            marker,
        }]
    }

    /// A best-point search answered with the found optimum.
    ///
    /// Stays `Querying`: issues the implicit point query at the best point
    /// to obtain its overlay before anything is shown.
    pub fn best_point_succeeded(&mut self, seq: RequestSeq, best: GridPoint) -> Vec<Command> {
        let Some(kind) = self.complete(seq) else {
            return Vec::new();
        };
        if kind != QueryKind::BestPoint {
            return Vec::new();
        }
        let seq = self.issue(QueryKind::BestPointFollowUp { best });
        vec![Command::SendPointQuery {
            seq,
            point: CanonicalPoint::new(best.col, best.row),
        }]
    }

    /// Any in-flight request failed. Reverts to the pre-request state and
    /// surfaces the service's detail; overlay and marker are untouched.
    pub fn query_failed(&mut self, seq: RequestSeq, detail: impl Into<String>) -> Vec<Command> {
        let Some(kind) = self.complete(seq) else {
            return Vec::new();
        };
        let error = match kind {
            QueryKind::Point { .. } => SessionError::QueryFailed(detail.into()),
            QueryKind::BestPoint | QueryKind::BestPointFollowUp { .. } => {
                SessionError::BestPointFailed(detail.into())
            }
        };
        vec![Command::Notify { error }]
    }

    /// The host-scheduled timeout for `seq` fired before a response arrived.
    ///
    /// Reverts to the pre-request state; the sequence check then suppresses
    /// the response if it eventually straggles in.
    pub fn timeout_expired(&mut self, seq: RequestSeq) -> Vec<Command> {
        if self.complete(seq).is_none() {
            return Vec::new();
        }
        vec![Command::Notify {
            error: SessionError::QueryTimedOut,
        }]
    }

    /// Clears the shown result, keeping the floorplan. Idempotent.
    pub fn reset(&mut self) -> Vec<Command> {
        if self.inflight.is_some() || self.floorplan.is_none() {
            return Vec::new();
        }
        self.marker = None;
        vec![Command::ClearOverlay]
    }

    fn issue(&mut self, kind: QueryKind) -> RequestSeq {
        self.next_seq += 1;
        let seq = RequestSeq(self.next_seq);
        self.inflight = Some(Inflight { seq, kind });
        seq
    }

    /// Consumes the in-flight request if `seq` is the current one.
    fn complete(&mut self, seq: RequestSeq) -> Option<QueryKind> {
        match &self.inflight {
            Some(inflight) if inflight.seq == seq => self.inflight.take().map(|f| f.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Command, DEFAULT_SAMPLE_COUNT, Phase, RequestSeq, Session, SessionConfig, SessionError,
    };
    use geometry::{CanonicalPoint, DisplayPoint, Extent};
    use pretty_assertions::assert_eq;
    use protocol::{GridPoint, ServiceConfig};

    fn session() -> Session {
        Session::new(SessionConfig::new(ServiceConfig::new("http://localhost:8000")))
    }

    fn loaded() -> Session {
        let mut s = session();
        let cmds = s
            .upload_succeeded(vec![1, 2, 3], Extent::new(400, 800))
            .expect("upload");
        assert_eq!(cmds, vec![Command::RedrawBase, Command::ClearOverlay]);
        s
    }

    fn sent_seq(cmds: &[Command]) -> RequestSeq {
        match cmds {
            [Command::SendPointQuery { seq, .. }] => *seq,
            [Command::SendBestPointQuery { seq, .. }] => *seq,
            other => panic!("expected a single send command, got {other:?}"),
        }
    }

    #[test]
    fn upload_computes_the_bounded_display_extent() {
        let s = loaded();
        let plan = s.floorplan().expect("floorplan");
        assert_eq!(plan.canonical, Extent::new(400, 800));
        assert_eq!(plan.display, Extent::new(256, 512));
        assert_eq!(s.phase(), Phase::Ready);
    }

    #[test]
    fn click_issues_a_point_query_at_the_containing_pixel() {
        let mut s = loaded();
        let cmds = s.click(DisplayPoint::new(10.0, 20.0));
        assert_eq!(
            cmds,
            vec![Command::SendPointQuery {
                seq: RequestSeq(1),
                point: CanonicalPoint::new(15, 31),
            }]
        );
        assert_eq!(s.phase(), Phase::Querying);
    }

    #[test]
    fn click_is_ignored_while_empty_or_querying() {
        let mut s = session();
        assert_eq!(s.click(DisplayPoint::new(1.0, 1.0)), vec![]);

        let mut s = loaded();
        let first = s.click(DisplayPoint::new(10.0, 20.0));
        let seq = sent_seq(&first);

        // Second trigger while querying: no request, state unchanged.
        assert_eq!(s.click(DisplayPoint::new(30.0, 40.0)), vec![]);
        assert_eq!(s.find_best(DEFAULT_SAMPLE_COUNT), vec![]);
        assert_eq!(s.reset(), vec![]);
        assert_eq!(s.phase(), Phase::Querying);

        // The first request still completes normally.
        let cmds = s.point_query_succeeded(seq, vec![9]);
        assert_eq!(cmds.len(), 1);
        assert_eq!(s.phase(), Phase::Displayed);
    }

    #[test]
    fn point_query_success_displays_the_clicked_marker() {
        let mut s = loaded();
        let seq = sent_seq(&s.click(DisplayPoint::new(10.0, 20.0)));

        let cmds = s.point_query_succeeded(seq, vec![0xAA]);
        assert_eq!(
            cmds,
            vec![Command::InstallOverlay {
                image: vec![0xAA],
                marker: CanonicalPoint::new(15, 31),
            }]
        );
        assert_eq!(s.phase(), Phase::Displayed);
        assert_eq!(s.marker(), Some(CanonicalPoint::new(15, 31)));
    }

    #[test]
    fn find_best_chains_into_a_follow_up_point_query() {
        let mut s = loaded();
        let cmds = s.find_best(50);
        let seq = sent_seq(&cmds);
        assert_eq!(
            cmds,
            vec![Command::SendBestPointQuery {
                seq,
                sample_count: 50,
            }]
        );

        let cmds = s.best_point_succeeded(seq, GridPoint { row: 100, col: 50 });
        let follow_up = sent_seq(&cmds);
        assert_ne!(follow_up, seq, "follow-up gets its own sequence number");
        assert_eq!(
            cmds,
            vec![Command::SendPointQuery {
                seq: follow_up,
                point: CanonicalPoint::new(50, 100),
            }]
        );
        assert_eq!(s.phase(), Phase::Querying);

        let cmds = s.point_query_succeeded(follow_up, vec![7]);
        assert_eq!(
            cmds,
            vec![Command::InstallOverlay {
                image: vec![7],
                marker: CanonicalPoint::new(50, 100),
            }]
        );
        assert_eq!(s.phase(), Phase::Displayed);
        assert_eq!(s.marker(), Some(CanonicalPoint::new(50, 100)));
    }

    #[test]
    fn failure_reverts_to_the_previous_state() {
        // First query fails from Ready: back to Ready.
        let mut s = loaded();
        let seq = sent_seq(&s.click(DisplayPoint::new(10.0, 20.0)));
        let cmds = s.query_failed(seq, "field unavailable");
        assert_eq!(
            cmds,
            vec![Command::Notify {
                error: SessionError::QueryFailed("field unavailable".to_string()),
            }]
        );
        assert_eq!(s.phase(), Phase::Ready);
        assert_eq!(s.marker(), None);

        // A later failure from Displayed keeps the shown result.
        let seq = sent_seq(&s.click(DisplayPoint::new(10.0, 20.0)));
        let _ = s.point_query_succeeded(seq, vec![1]);
        let shown = s.marker();
        let seq = sent_seq(&s.click(DisplayPoint::new(100.0, 100.0)));
        let _ = s.query_failed(seq, "boom");
        assert_eq!(s.phase(), Phase::Displayed);
        assert_eq!(s.marker(), shown);
    }

    #[test]
    fn best_point_follow_up_failure_also_reverts() {
        let mut s = loaded();
        let seq = sent_seq(&s.find_best(50));
        let follow_up = sent_seq(&s.best_point_succeeded(seq, GridPoint { row: 1, col: 2 }));

        let cmds = s.query_failed(follow_up, "no path");
        assert_eq!(
            cmds,
            vec![Command::Notify {
                error: SessionError::BestPointFailed("no path".to_string()),
            }]
        );
        assert_eq!(s.phase(), Phase::Ready);
    }

    #[test]
    fn stale_completions_are_discarded() {
        let mut s = loaded();
        let seq = sent_seq(&s.click(DisplayPoint::new(10.0, 20.0)));

        // Timeout fires first: revert with a timeout error.
        let cmds = s.timeout_expired(seq);
        assert_eq!(
            cmds,
            vec![Command::Notify {
                error: SessionError::QueryTimedOut,
            }]
        );
        assert_eq!(s.phase(), Phase::Ready);

        // The response straggles in afterwards: suppressed on every path.
        assert_eq!(s.point_query_succeeded(seq, vec![1]), vec![]);
        assert_eq!(s.query_failed(seq, "late"), vec![]);
        assert_eq!(s.timeout_expired(seq), vec![]);
        assert_eq!(s.phase(), Phase::Ready);
    }

    #[test]
    fn timeout_for_a_superseded_request_is_a_no_op() {
        let mut s = loaded();
        let first = sent_seq(&s.click(DisplayPoint::new(10.0, 20.0)));
        let _ = s.point_query_succeeded(first, vec![1]);
        let second = sent_seq(&s.click(DisplayPoint::new(30.0, 30.0)));

        // The first request's timer fires after its request already
        // completed; the second request must stay in flight.
        assert_eq!(s.timeout_expired(first), vec![]);
        assert_eq!(s.phase(), Phase::Querying);

        let _ = s.point_query_succeeded(second, vec![2]);
        assert_eq!(s.phase(), Phase::Displayed);
    }

    #[test]
    fn reset_clears_the_result_and_is_idempotent() {
        let mut s = loaded();
        let seq = sent_seq(&s.click(DisplayPoint::new(10.0, 20.0)));
        let _ = s.point_query_succeeded(seq, vec![1]);
        assert_eq!(s.phase(), Phase::Displayed);

        assert_eq!(s.reset(), vec![Command::ClearOverlay]);
        assert_eq!(s.phase(), Phase::Ready);
        assert!(s.floorplan().is_some(), "floorplan is retained");

        assert_eq!(s.reset(), vec![Command::ClearOverlay]);
        assert_eq!(s.phase(), Phase::Ready);
    }

    #[test]
    fn reset_does_nothing_while_empty() {
        let mut s = session();
        assert_eq!(s.reset(), vec![]);
        assert_eq!(s.phase(), Phase::Empty);
    }

    #[test]
    fn upload_replaces_the_floorplan_and_clears_the_result() {
        let mut s = loaded();
        let seq = sent_seq(&s.click(DisplayPoint::new(10.0, 20.0)));
        let _ = s.point_query_succeeded(seq, vec![1]);
        assert_eq!(s.phase(), Phase::Displayed);

        let cmds = s
            .upload_succeeded(vec![9], Extent::new(1024, 512))
            .expect("upload");
        assert_eq!(cmds, vec![Command::RedrawBase, Command::ClearOverlay]);
        assert_eq!(s.phase(), Phase::Ready);
        assert_eq!(s.marker(), None);
        let plan = s.floorplan().expect("floorplan");
        assert_eq!(plan.display, Extent::new(512, 256));
    }

    #[test]
    fn upload_is_refused_while_querying() {
        let mut s = loaded();
        let before = s.floorplan().cloned();
        let seq = sent_seq(&s.click(DisplayPoint::new(10.0, 20.0)));

        let cmds = s
            .upload_succeeded(vec![9], Extent::new(10, 10))
            .expect("upload");
        assert_eq!(cmds, vec![]);
        assert_eq!(s.floorplan().cloned(), before);
        assert_eq!(s.phase(), Phase::Querying);

        let _ = s.point_query_succeeded(seq, vec![1]);
        assert_eq!(s.phase(), Phase::Displayed);
    }

    #[test]
    fn upload_failure_keeps_the_state_and_notifies() {
        let mut s = session();
        let cmds = s.upload_failed("no file part");
        assert_eq!(
            cmds,
            vec![Command::Notify {
                error: SessionError::UploadFailed("no file part".to_string()),
            }]
        );
        assert_eq!(s.phase(), Phase::Empty);
    }

    #[test]
    fn degenerate_upload_dimensions_are_rejected() {
        let mut s = session();
        assert!(s.upload_succeeded(vec![1], Extent::new(0, 10)).is_err());
        assert_eq!(s.phase(), Phase::Empty);
    }

    #[test]
    fn error_messages_carry_the_service_detail() {
        assert_eq!(
            SessionError::QueryFailed("field unavailable".to_string()).to_string(),
            "query failed: field unavailable"
        );
        assert_eq!(SessionError::QueryTimedOut.to_string(), "query timed out");
    }
}
