//! Stage handlers
//!
//! One handler per stage. Handlers mutate the in-memory session only and
//! report progression through `StageOutcome`; the orchestrator core owns
//! validation and persistence. Facts gathered by earlier stages are read,
//! never rewritten, once a later stage runs.

use std::collections::HashSet;

use chrono::{Duration, NaiveTime};
use eyre::{Result, bail};
use tracing::{info, warn};

use crate::domain::intent::{parse_duration_minutes, parse_time};
use crate::domain::{
    Applicability, Block, BlockKind, ConstraintDraft, ConstraintScope, FrameFacts, InputFacts, Intent, PlanModel,
    Rule, RuleKind, Session, SessionStatus, Stage, TaskItem, generate_id, parse_intent,
};
use crate::error::SyncError;
use crate::refine::RefineOutcome;
use crate::sync::RemoteItem;

use super::core::StageOrchestrator;
use super::messages::{Response, StageOutcome};

impl StageOrchestrator {
    /// COLLECT: establish the frame of the day (schedulable window, buffer
    /// preference). Standing preferences discovered here are queued as
    /// constraint candidates.
    pub(crate) async fn handle_collect(&self, session: &mut Session, text: &str) -> Result<(Response, StageOutcome)> {
        let Some((day_start, day_end)) = parse_day_window(text) else {
            let response = Response::new(
                "What hours should I plan within? Something like \"9:00-17:30\", \
                 optionally with a buffer like \"buffer 15m\".",
            )
            .with_controls(&["9:00-17:30 buffer 15m"]);
            return Ok((response, StageOutcome::stay()));
        };

        let buffer_minutes = parse_buffer(text).unwrap_or(self.config.default_buffer_minutes);
        session.frame_facts = Some(FrameFacts {
            day_start,
            day_end,
            buffer_minutes,
        });

        session.pending_constraints.push(ConstraintDraft {
            scope: ConstraintScope::Profile,
            applicability: Applicability::any(),
            rule: Rule::prefer_window(day_start, day_end),
            confidence: 0.6,
            lock: false,
        });
        if buffer_minutes > 0 {
            session.pending_constraints.push(ConstraintDraft {
                scope: ConstraintScope::Profile,
                applicability: Applicability::any(),
                rule: Rule::buffer_after(buffer_minutes),
                confidence: 0.7,
                lock: false,
            });
        }

        info!(session_id = %session.id, %day_start, %day_end, buffer_minutes, "Frame collected");

        let response = Response::new(format!(
            "Planning {} from {} to {}. What should I schedule? List tasks like \
             \"deep work 2h, email 30m\" and say \"done\" when that's everything.",
            session.target_date,
            day_start.format("%H:%M"),
            day_end.format("%H:%M"),
        ))
        .with_controls(&["deep work 2h, email 30m"]);
        Ok((response, StageOutcome::next()))
    }

    /// CAPTURE: accumulate the tasks to schedule across turns until the
    /// user says they're done.
    pub(crate) async fn handle_capture(&self, session: &mut Session, text: &str) -> Result<(Response, StageOutcome)> {
        let lowered = text.trim().to_lowercase();
        let facts = session.input_facts.get_or_insert_with(InputFacts::default);

        if matches!(lowered.as_str(), "done" | "that's all" | "thats all") {
            if facts.tasks.is_empty() {
                let response = Response::new(
                    "I don't have any tasks yet. List at least one, like \"deep work 2h\".",
                );
                return Ok((response, StageOutcome::stay()));
            }
            let response = Response::new(format!(
                "Captured {} task(s). Say \"build\" and I'll draft the day around your calendar.",
                facts.tasks.len()
            ))
            .with_controls(&["build"]);
            return Ok((response, StageOutcome::next()));
        }

        let (tasks, rejected) = parse_tasks(text);
        if tasks.is_empty() {
            let response = Response::new(
                "I couldn't read any tasks from that. Use \"<name> <duration>\", e.g. \
                 \"deep work 2h, email 30m after 13:00\".",
            );
            return Ok((response, StageOutcome::stay()));
        }
        facts.tasks.extend(tasks);

        let mut lines: Vec<String> = facts
            .tasks
            .iter()
            .map(|t| match t.earliest {
                Some(earliest) => format!("  {} ({}m, after {})", t.label, t.duration_minutes, earliest.format("%H:%M")),
                None => format!("  {} ({}m)", t.label, t.duration_minutes),
            })
            .collect();
        if !rejected.is_empty() {
            lines.push(format!("  (couldn't read: {})", rejected.join(", ")));
        }
        let response = Response::new(format!(
            "So far:\n{}\nAdd more, or say \"done\".",
            lines.join("\n")
        ))
        .with_controls(&["done"]);
        Ok((response, StageOutcome::stay()))
    }

    /// SKELETON: pull the remote day, anchor on immovables, and first-fit
    /// the captured tasks into free gaps, biased by retrieved constraints.
    /// Sets both the working plan and the baseline (the imported remote
    /// snapshot the next diff runs against).
    pub(crate) async fn handle_skeleton(&self, session: &mut Session, _text: &str) -> Result<(Response, StageOutcome)> {
        let Some(frame) = session.frame_facts.clone() else {
            bail!("skeleton stage reached without frame facts");
        };
        let tasks = session.input_facts.clone().unwrap_or_default().tasks;

        let items = self.remote.list(session.target_date).await?;

        // Widen the window so out-of-hours anchors still validate
        let mut day_start = frame.day_start;
        let mut day_end = frame.day_end;
        for item in &items {
            day_start = day_start.min(item.start);
            day_end = day_end.max(item.end);
        }

        let mut plan = PlanModel::new(session.target_date, day_start, day_end);
        for item in &items {
            plan.blocks.push(block_from_remote(item));
        }
        let baseline = plan.clone();

        let constraints = self
            .constraints
            .retrieve(Stage::Skeleton, session.target_date, &[])
            .await?;
        let earliest_rule = constraints
            .iter()
            .filter(|c| c.rule.kind == RuleKind::NoEarlierThan)
            .filter_map(|c| c.rule.time_param("time"))
            .max();
        let latest_rule = constraints
            .iter()
            .filter(|c| c.rule.kind == RuleKind::NoLaterThan)
            .filter_map(|c| c.rule.time_param("time"))
            .min();
        let buffer = constraints
            .iter()
            .filter(|c| c.rule.kind == RuleKind::BufferAfter)
            .filter_map(|c| c.rule.minutes_param())
            .max()
            .unwrap_or(0)
            .max(frame.buffer_minutes) as i64;
        // Soft bias: tasks without their own earliest start land inside the
        // preferred window when one is on file
        let preferred_start = constraints
            .iter()
            .filter(|c| c.rule.kind == RuleKind::PreferWindow)
            .filter_map(|c| c.rule.time_param("start"))
            .max();

        let mut unplaced = Vec::new();
        for task in &tasks {
            let not_before = match (task.earliest.or(preferred_start), earliest_rule) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            // Search with the buffer included so breathing room survives
            // after the block; fall back to a tight fit
            let start = plan
                .find_gap(task.duration_minutes + buffer, not_before)
                .or_else(|| plan.find_gap(task.duration_minutes, not_before));

            let Some(start) = start else {
                unplaced.push(task.label.clone());
                continue;
            };
            let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(task.duration_minutes));
            if wrapped != 0 || latest_rule.map(|limit| end > limit).unwrap_or(false) {
                unplaced.push(task.label.clone());
                continue;
            }
            plan.blocks
                .push(Block::flexible(generate_id("blk", &task.label), &task.label, start, end));
        }

        if let Err(violation) = plan.validate() {
            bail!("skeleton produced an invalid plan: {}", violation);
        }

        info!(
            session_id = %session.id,
            anchors = baseline.blocks.len(),
            placed = tasks.len() - unplaced.len(),
            unplaced = unplaced.len(),
            "Skeleton built"
        );

        session.plan = Some(plan.clone());
        session.baseline = Some(baseline);

        let mut text = format!("Here's a draft for {}:\n{}", session.target_date, render_plan(&plan));
        if !unplaced.is_empty() {
            text.push_str(&format!("\nCouldn't fit: {}.", unplaced.join(", ")));
        }
        text.push_str(
            "\nAdjust with \"move <block> to <time>\", \"add <task> <duration>\", \
             \"remove <block>\", or say \"done\" to review.",
        );
        Ok((Response::new(text).with_controls(&["done"]), StageOutcome::next()))
    }

    /// REFINE: run feedback through the refinement loop. The loop returns a
    /// new plan or a typed rejection; external effects wait for REVIEW.
    pub(crate) async fn handle_refine(&self, session: &mut Session, text: &str) -> Result<(Response, StageOutcome)> {
        let Some(plan) = session.plan.clone() else {
            bail!("refine stage reached without a plan");
        };

        let Some(intent) = parse_intent(text) else {
            let response = Response::new(format!(
                "Current plan:\n{}\nI understand \"move <block> to <time>\", \"shift <block> +30m\", \
                 \"add <task> <duration>\", \"remove <block>\", or \"done\" to review.",
                render_plan(&plan)
            ))
            .with_controls(&["done"]);
            return Ok((response, StageOutcome::stay()));
        };

        match &intent {
            Intent::Approve => {
                let response = Response::new(format!(
                    "Final look:\n{}\nSay \"commit\" to push this to your calendar, or \"revise\" to keep editing.",
                    render_plan(&plan)
                ))
                .with_controls(&["commit", "revise"]);
                return Ok((response, StageOutcome::next()));
            }
            Intent::RequestChanges => {
                let response = Response::new("We're still refining - tell me what to change.");
                return Ok((response, StageOutcome::stay()));
            }
            Intent::Move { target, .. } | Intent::Shift { target, .. } | Intent::Remove { target } => {
                if plan.find_by_label(target).is_none() {
                    let response = Response::new(format!(
                        "I can't find a block matching \"{}\". Current plan:\n{}",
                        target,
                        render_plan(&plan)
                    ));
                    return Ok((response, StageOutcome::stay()));
                }
            }
            Intent::Add { .. } => {}
        }

        match self
            .refiner
            .refine(&plan, &intent, self.config.max_refine_attempts)
            .await?
        {
            RefineOutcome::Refined(next) => {
                session.plan = Some(next.clone());
                let response = Response::new(format!(
                    "Updated:\n{}\nAnything else? Say \"done\" to review.",
                    render_plan(&next)
                ))
                .with_controls(&["done"]);
                Ok((response, StageOutcome::stay()))
            }
            RefineOutcome::Rejected(failure) => {
                let response = Response::new(format!(
                    "I couldn't apply that after {} attempt(s): {}. The plan is unchanged - \
                     try a different time or remove something first.",
                    failure.attempts, failure.last
                ));
                Ok((response, StageOutcome::stay()))
            }
        }
    }

    /// REVIEW: commit runs the sync engine against the session baseline and
    /// completes the session; a change request is the one permitted
    /// regression back to REFINE.
    pub(crate) async fn handle_review(&self, session: &mut Session, text: &str) -> Result<(Response, StageOutcome)> {
        let Some(plan) = session.plan.clone() else {
            bail!("review stage reached without a plan");
        };

        match parse_intent(text) {
            Some(Intent::Approve) => {
                let baseline = session
                    .baseline
                    .clone()
                    .unwrap_or_else(|| PlanModel::new(plan.date, plan.day_start, plan.day_end));

                match self.sync.commit(&session.id, &baseline, &plan).await {
                    Ok(outcome) => {
                        let summary = match &outcome.transaction {
                            Some(txn) => format!(
                                "Committed {} change(s) to your calendar (transaction #{}).",
                                txn.operations.len(),
                                txn.seq
                            ),
                            None => "Your calendar already matches the plan - nothing to send.".to_string(),
                        };
                        session.plan = Some(outcome.plan.clone());
                        session.baseline = Some(outcome.plan);
                        session.set_status(SessionStatus::Completed);
                        Ok((Response::new(format!("{} Enjoy your day.", summary)), StageOutcome::next()))
                    }
                    Err(SyncError::RemoteInconsistency { remote_id, reason }) => {
                        warn!(session_id = %session.id, %remote_id, %reason, "Reconciling against drifted remote");
                        let items = self.remote.list(session.target_date).await?;
                        reconcile_from_snapshot(session, &items);
                        let response = Response::new(format!(
                            "Your calendar changed since I last looked ({}: {}). I've refreshed my \
                             view - say \"commit\" to retry, or \"revise\" to adjust first.",
                            remote_id, reason
                        ))
                        .with_controls(&["commit", "revise"]);
                        Ok((response, StageOutcome::stay()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Some(Intent::RequestChanges) => {
                let response = Response::new("Back to refining - tell me what to change.");
                Ok((response, StageOutcome::to(Stage::Refine)))
            }
            _ => {
                let response = Response::new(format!(
                    "Ready to commit:\n{}\nSay \"commit\" to sync, or \"revise\" to keep editing.",
                    render_plan(&plan)
                ))
                .with_controls(&["commit", "revise"]);
                Ok((response, StageOutcome::stay()))
            }
        }
    }
}

fn block_from_remote(item: &RemoteItem) -> Block {
    if item.movable {
        let mut block = Block::flexible(format!("blk-{}", item.id), &item.label, item.start, item.end);
        block.source_ref = Some(item.id.clone());
        block
    } else {
        Block::immovable(format!("blk-{}", item.id), &item.label, item.start, item.end, &item.id)
    }
}

/// Rebuild the baseline from a fresh remote snapshot and fix up the working
/// plan: stale remote refs are cleared (those blocks re-create on the next
/// commit) and the immovable set mirrors what the remote now holds.
fn reconcile_from_snapshot(session: &mut Session, items: &[RemoteItem]) {
    let Some(plan) = session.plan.as_mut() else {
        return;
    };

    let mut baseline = PlanModel::new(plan.date, plan.day_start, plan.day_end);
    for item in items {
        // Keep the working plan's id for blocks it already tracks so the
        // diff pairs them up as updates, not create+delete
        let local_id = plan
            .blocks
            .iter()
            .find(|b| b.source_ref.as_deref() == Some(item.id.as_str()))
            .map(|b| b.id.clone())
            .unwrap_or_else(|| format!("blk-{}", item.id));

        let mut block = block_from_remote(item);
        block.id = local_id;
        baseline.blocks.push(block);
    }

    let live: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
    for block in &mut plan.blocks {
        if block.kind == BlockKind::Flexible
            && let Some(remote_id) = block.source_ref.as_deref()
            && !live.contains(remote_id)
        {
            block.source_ref = None;
        }
    }
    plan.blocks.retain(|b| b.kind != BlockKind::Immovable);
    let anchors: Vec<Block> = baseline.immovables().cloned().collect();
    plan.blocks.extend(anchors);

    session.baseline = Some(baseline);
}

/// Render a plan for display, anchors marked
fn render_plan(plan: &PlanModel) -> String {
    plan.sorted()
        .into_iter()
        .map(|b| {
            let marker = if b.kind == BlockKind::Immovable { " (anchor)" } else { "" };
            format!(
                "  {}-{}  {}{}",
                b.start.format("%H:%M"),
                b.end.format("%H:%M"),
                b.label,
                marker
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find a "start-end" window anywhere in the text, e.g. "9:00-17:30" or "9-17"
fn parse_day_window(text: &str) -> Option<(NaiveTime, NaiveTime)> {
    for token in text.split_whitespace() {
        if let Some((start_str, end_str)) = token.split_once('-')
            && let Some(start) = parse_time(start_str)
            && let Some(end) = parse_time(end_str)
            && start < end
        {
            return Some((start, end));
        }
    }
    None
}

/// Find "buffer <duration>" anywhere in the text
fn parse_buffer(text: &str) -> Option<u32> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let position = words.iter().position(|w| w.eq_ignore_ascii_case("buffer"))?;
    parse_duration_minutes(words.get(position + 1)?).map(|m| m as u32)
}

/// Parse comma/semicolon-separated task entries of the form
/// `<label> <duration> [after <time>]`. Returns parsed tasks and the
/// entries that could not be read.
fn parse_tasks(text: &str) -> (Vec<TaskItem>, Vec<String>) {
    let mut tasks = Vec::new();
    let mut rejected = Vec::new();

    for entry in text.split([',', ';']) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut words: Vec<&str> = entry.split_whitespace().collect();

        let mut earliest = None;
        if words.len() >= 4 && words[words.len() - 2].eq_ignore_ascii_case("after") {
            if let Some(time) = parse_time(words[words.len() - 1]) {
                earliest = Some(time);
                words.truncate(words.len() - 2);
            }
        }

        let parsed = match words.split_last() {
            Some((duration_str, label_words)) if !label_words.is_empty() => {
                parse_duration_minutes(duration_str).map(|duration_minutes| TaskItem {
                    label: label_words.join(" "),
                    duration_minutes,
                    earliest,
                })
            }
            _ => None,
        };

        match parsed {
            Some(task) => tasks.push(task),
            None => rejected.push(entry.to_string()),
        }
    }

    (tasks, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_parse_day_window() {
        assert_eq!(parse_day_window("plan 9:00-17:30 please"), Some((t(9, 0), t(17, 30))));
        assert_eq!(parse_day_window("9-17"), Some((t(9, 0), t(17, 0))));
        assert_eq!(parse_day_window("17-9"), None);
        assert_eq!(parse_day_window("no window here"), None);
    }

    #[test]
    fn test_parse_buffer() {
        assert_eq!(parse_buffer("9-17 buffer 15m"), Some(15));
        assert_eq!(parse_buffer("9-17 buffer 1h"), Some(60));
        assert_eq!(parse_buffer("9-17"), None);
    }

    #[test]
    fn test_parse_tasks() {
        let (tasks, rejected) = parse_tasks("deep work 2h, email 30m after 13:00, nonsense");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].label, "deep work");
        assert_eq!(tasks[0].duration_minutes, 120);
        assert_eq!(tasks[1].label, "email");
        assert_eq!(tasks[1].earliest, Some(t(13, 0)));
        assert_eq!(rejected, vec!["nonsense".to_string()]);
    }

    #[test]
    fn test_render_plan_marks_anchors() {
        let mut plan = PlanModel::new(NaiveDate::from_ymd_opt(2026, 8, 6).unwrap(), t(9, 0), t(17, 0));
        plan.blocks.push(Block::immovable("m", "Standup", t(9, 0), t(9, 30), "evt-1"));
        plan.blocks.push(Block::flexible("a", "Deep Work", t(10, 0), t(12, 0)));

        let rendered = render_plan(&plan);
        assert!(rendered.contains("09:00-09:30  Standup (anchor)"));
        assert!(rendered.contains("10:00-12:00  Deep Work"));
    }

    #[test]
    fn test_reconcile_from_snapshot() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        let mut session = Session::new("james", date);

        let mut plan = PlanModel::new(date, t(9, 0), t(17, 0));
        let mut tracked = Block::flexible("a", "Focus", t(10, 0), t(11, 0));
        tracked.source_ref = Some("evt-a".to_string());
        let mut vanished = Block::flexible("b", "Email", t(11, 0), t(11, 30));
        vanished.source_ref = Some("evt-gone".to_string());
        plan.blocks.push(tracked);
        plan.blocks.push(vanished);
        session.plan = Some(plan);

        // Remote now: evt-a moved, evt-gone deleted, a new anchor appeared
        let items = vec![
            RemoteItem {
                id: "evt-a".to_string(),
                date,
                start: t(14, 0),
                end: t(15, 0),
                label: "Focus".to_string(),
                movable: true,
            },
            RemoteItem {
                id: "evt-m".to_string(),
                date,
                start: t(9, 0),
                end: t(9, 30),
                label: "Standup".to_string(),
                movable: false,
            },
        ];
        reconcile_from_snapshot(&mut session, &items);

        let baseline = session.baseline.unwrap();
        assert_eq!(baseline.blocks.len(), 2);
        // Tracked block keeps its local id in the rebuilt baseline
        assert!(baseline.get("a").is_some());

        let plan = session.plan.unwrap();
        // Vanished ref cleared so the block re-creates on commit
        assert!(plan.get("b").unwrap().source_ref.is_none());
        // Anchor set mirrors the remote
        assert_eq!(plan.immovables().count(), 1);
    }
}
