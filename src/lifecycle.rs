use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;

use crate::store::{self, SemesterRow, Status, StoreError, TermRow};

/// Everything the transition decision needs: the active term (terminal
/// archived terms are never revisited) and all of its semesters.
#[derive(Debug, Clone)]
pub struct LifecycleSnapshot {
    pub active_term: Option<TermRow>,
    pub semesters: Vec<SemesterRow>,
}

/// Decided transitions for one engine pass. Archiving a term implies
/// archiving its still-active semesters in the same transaction, so
/// `archive_semesters` only carries semesters that end while their term
/// stays active.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionPlan {
    pub archive_term: Option<String>,
    pub archive_semesters: Vec<String>,
    pub activate_semester: Option<String>,
    pub errors: Vec<String>,
}

impl TransitionPlan {
    pub fn is_empty(&self) -> bool {
        self.archive_term.is_none()
            && self.archive_semesters.is_empty()
            && self.activate_semester.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSummary {
    pub terms_archived: i64,
    pub terms_activated: i64,
    pub semesters_archived: i64,
    pub semesters_activated: i64,
    pub errors: Vec<String>,
}

pub fn load_snapshot(conn: &Connection) -> Result<LifecycleSnapshot, StoreError> {
    let active_term = store::get_active_term(conn)?;
    let semesters = match &active_term {
        Some(t) => store::list_semesters(conn, &t.id)?,
        None => Vec::new(),
    };
    Ok(LifecycleSnapshot {
        active_term,
        semesters,
    })
}

/// Pure decision step. Date-only comparisons; an end date equal to today
/// still counts as active.
pub fn compute_transitions(today: NaiveDate, snapshot: &LifecycleSnapshot) -> TransitionPlan {
    let mut plan = TransitionPlan::default();

    let Some(term) = &snapshot.active_term else {
        return plan;
    };

    let term_end = match term.end() {
        Some(d) => d,
        None => {
            plan.errors
                .push(format!("term {} has unparseable end date", term.id));
            return plan;
        }
    };

    if today > term_end {
        plan.archive_term = Some(term.id.clone());
        return plan;
    }

    for sem in &snapshot.semesters {
        if sem.status != Status::Active {
            continue;
        }
        match sem.end() {
            Some(end) if today > end => plan.archive_semesters.push(sem.id.clone()),
            Some(_) => {}
            None => plan
                .errors
                .push(format!("semester {} has unparseable end date", sem.id)),
        }
    }

    let still_active = snapshot.semesters.iter().any(|s| {
        s.status == Status::Active && !plan.archive_semesters.iter().any(|id| id == &s.id)
    });
    if still_active {
        return plan;
    }

    let mut candidates: Vec<&SemesterRow> = Vec::new();
    for sem in &snapshot.semesters {
        if sem.status == Status::Active {
            continue;
        }
        let (Some(start), Some(end)) = (sem.start(), sem.end()) else {
            continue;
        };
        if start <= today && today <= end {
            candidates.push(sem);
        }
    }

    match candidates.len() {
        0 => {}
        1 => plan.activate_semester = Some(candidates[0].id.clone()),
        n => plan.errors.push(format!(
            "{} semesters of term {} match today's date range; not activating any",
            n, term.id
        )),
    }

    plan
}

/// Apply a plan best-effort: each step is independent, failures are
/// collected and logged, and every write re-checks current status so a
/// concurrent pass that already applied the same plan counts as zero.
pub fn apply_transitions(conn: &Connection, plan: &TransitionPlan) -> TransitionSummary {
    let mut summary = TransitionSummary {
        errors: plan.errors.clone(),
        ..TransitionSummary::default()
    };

    if let Some(term_id) = &plan.archive_term {
        match store::archive_term_with_semesters(conn, term_id) {
            Ok((terms, semesters)) => {
                summary.terms_archived += terms as i64;
                summary.semesters_archived += semesters as i64;
            }
            Err(e) => {
                tracing::warn!(term_id = %term_id, error = %e, "term archival failed");
                summary.errors.push(format!("archive term {}: {}", term_id, e));
            }
        }
    }

    for sem_id in &plan.archive_semesters {
        match mark_semester_archived(conn, sem_id) {
            Ok(changed) => summary.semesters_archived += changed as i64,
            Err(e) => {
                tracing::warn!(semester_id = %sem_id, error = %e, "semester archival failed");
                summary
                    .errors
                    .push(format!("archive semester {}: {}", sem_id, e));
            }
        }
    }

    if let Some(sem_id) = &plan.activate_semester {
        match mark_semester_activated(conn, sem_id) {
            Ok(changed) => summary.semesters_activated += changed as i64,
            Err(e) => {
                tracing::warn!(semester_id = %sem_id, error = %e, "semester activation failed");
                summary
                    .errors
                    .push(format!("activate semester {}: {}", sem_id, e));
            }
        }
    }

    summary
}

fn mark_semester_archived(conn: &Connection, semester_id: &str) -> Result<usize, StoreError> {
    conn.execute(
        "UPDATE semesters SET status = 'archived' WHERE id = ? AND status = 'active'",
        [semester_id],
    )
    .map_err(|e| StoreError::new("db_update_failed", e.to_string()))
}

// The WHERE clause re-checks the invariants (parent term active, no
// sibling already active) so a racing pass cannot create a second active
// semester or an active semester under an archived term.
fn mark_semester_activated(conn: &Connection, semester_id: &str) -> Result<usize, StoreError> {
    conn.execute(
        "UPDATE semesters SET status = 'active'
         WHERE id = ?
           AND status != 'active'
           AND EXISTS (
             SELECT 1 FROM terms t
             WHERE t.id = semesters.term_id AND t.status = 'active'
           )
           AND NOT EXISTS (
             SELECT 1 FROM semesters s2
             WHERE s2.term_id = semesters.term_id AND s2.status = 'active'
           )",
        [semester_id],
    )
    .map_err(|e| StoreError::new("db_update_failed", e.to_string()))
}

/// One full engine pass: snapshot, decide, apply. A snapshot failure is
/// reported in the summary rather than raised; the caller's primary
/// action (login) never fails on archival bookkeeping.
pub fn run_status_update(conn: &Connection, today: NaiveDate) -> TransitionSummary {
    let snapshot = match load_snapshot(conn) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "lifecycle snapshot load failed");
            return TransitionSummary {
                errors: vec![format!("load snapshot: {}", e)],
                ..TransitionSummary::default()
            };
        }
    };
    let plan = compute_transitions(today, &snapshot);
    apply_transitions(conn, &plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date")
    }

    fn term(id: &str, start: &str, end: &str) -> TermRow {
        TermRow {
            id: id.to_string(),
            label: format!("SY {}", id),
            start_date: start.to_string(),
            end_date: end.to_string(),
            status: Status::Active,
        }
    }

    fn sem(id: &str, term_id: &str, start: &str, end: &str, status: Status) -> SemesterRow {
        SemesterRow {
            id: id.to_string(),
            term_id: term_id.to_string(),
            label: id.to_string(),
            start_date: start.to_string(),
            end_date: end.to_string(),
            status,
        }
    }

    #[test]
    fn no_active_term_yields_empty_plan() {
        let snap = LifecycleSnapshot {
            active_term: None,
            semesters: vec![],
        };
        let plan = compute_transitions(date("2024-06-01"), &snap);
        assert!(plan.is_empty());
        assert!(plan.errors.is_empty());
    }

    #[test]
    fn end_date_is_inclusive() {
        let snap = LifecycleSnapshot {
            active_term: Some(term("t1", "2023-08-01", "2024-05-31")),
            semesters: vec![sem(
                "s1",
                "t1",
                "2024-01-08",
                "2024-05-31",
                Status::Active,
            )],
        };
        let plan = compute_transitions(date("2024-05-31"), &snap);
        assert!(plan.is_empty(), "term and semester still active on end date");
    }

    #[test]
    fn term_past_end_is_archived_with_cascade_implied() {
        let snap = LifecycleSnapshot {
            active_term: Some(term("t1", "2023-08-01", "2024-05-31")),
            semesters: vec![sem(
                "s1",
                "t1",
                "2024-01-08",
                "2024-05-31",
                Status::Active,
            )],
        };
        let plan = compute_transitions(date("2024-06-01"), &snap);
        assert_eq!(plan.archive_term.as_deref(), Some("t1"));
        // Cascade is carried by the term archival transaction, not listed
        // as individual semester steps.
        assert!(plan.archive_semesters.is_empty());
        assert!(plan.activate_semester.is_none());
    }

    #[test]
    fn ended_semester_archives_and_next_window_activates() {
        let snap = LifecycleSnapshot {
            active_term: Some(term("t1", "2024-08-01", "2025-05-31")),
            semesters: vec![
                sem("s1", "t1", "2024-08-01", "2024-12-20", Status::Active),
                sem("s2", "t1", "2025-01-06", "2025-05-31", Status::Archived),
            ],
        };
        let plan = compute_transitions(date("2025-01-10"), &snap);
        assert!(plan.archive_term.is_none());
        assert_eq!(plan.archive_semesters, vec!["s1".to_string()]);
        assert_eq!(plan.activate_semester.as_deref(), Some("s2"));
    }

    #[test]
    fn no_activation_while_a_sibling_is_still_active() {
        let snap = LifecycleSnapshot {
            active_term: Some(term("t1", "2024-08-01", "2025-05-31")),
            semesters: vec![
                sem("s1", "t1", "2024-08-01", "2025-01-31", Status::Active),
                sem("s2", "t1", "2025-01-06", "2025-05-31", Status::Archived),
            ],
        };
        let plan = compute_transitions(date("2025-01-10"), &snap);
        assert!(plan.is_empty());
        assert!(plan.errors.is_empty());
    }

    #[test]
    fn overlapping_activation_candidates_pick_none_and_report() {
        let snap = LifecycleSnapshot {
            active_term: Some(term("t1", "2024-08-01", "2025-05-31")),
            semesters: vec![
                sem("s1", "t1", "2024-08-01", "2025-01-31", Status::Archived),
                sem("s2", "t1", "2025-01-06", "2025-05-31", Status::Archived),
            ],
        };
        let plan = compute_transitions(date("2025-01-10"), &snap);
        assert!(plan.activate_semester.is_none());
        assert_eq!(plan.errors.len(), 1);
    }

    #[test]
    fn fresh_semester_window_activates_from_default_status() {
        let snap = LifecycleSnapshot {
            active_term: Some(term("t2", "2025-06-01", "2026-05-31")),
            semesters: vec![sem(
                "s2",
                "t2",
                "2025-06-01",
                "2025-09-29",
                Status::Archived,
            )],
        };
        let plan = compute_transitions(date("2025-06-01"), &snap);
        assert_eq!(plan.activate_semester.as_deref(), Some("s2"));
        assert!(plan.archive_term.is_none());
        assert!(plan.archive_semesters.is_empty());
    }
}
