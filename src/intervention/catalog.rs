//! Role- and step-aware help content.
//!
//! Message bodies live in a lookup table keyed by (role, step) rather than
//! in branching code, so new roles, steps, or copy changes are data edits.
//! Composition appends two conditional augmentations: an acknowledgment
//! when the user has been parked on a step for a long time, and an
//! extra-support offer when earlier interventions did not land.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::UserRole;

/// Titles of the five baseline onboarding steps, in order.
const STEP_TITLES: [&str; 5] = [
    "Set up your workspace",
    "Upload a document",
    "Review the extracted summary",
    "Confirm your task list",
    "Wrap up and invite your team",
];

/// A step counts as long-running once the user has been on it strictly
/// longer than this.
const LONG_STEP_SECONDS: f64 = 300.0;

const GENERIC_BODY: &str = "It looks like you might be stuck. If anything in this \
     step is unclear, the help panel has a short walkthrough, or you can skip \
     ahead and come back later.";

/// How the message body was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Body matched the user's role and current step.
    ContextualHelp,
    /// Fallback body; role unknown or combination unmapped.
    GenericHelp,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::ContextualHelp => write!(f, "contextual_help"),
            MessageKind::GenericHelp => write!(f, "generic_help"),
        }
    }
}

/// Everything composition needs to know about where the user is.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub user_role: Option<UserRole>,
    pub step_number: u32,
    pub step_title: String,
    pub total_steps: u32,
    pub time_on_step_seconds: f64,
    pub previous_interventions: u32,
    pub engagement_score: f64,
}

/// Context blob carried inside the message envelope, mirrored to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContext {
    pub step_number: u32,
    pub step_title: String,
    pub user_role: String,
    pub engagement_score: f64,
    pub time_on_step: f64,
}

/// A composed help message ready for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelpMessage {
    pub id: Uuid,
    pub message_type: MessageKind,
    pub content: String,
    pub dismissible: bool,
    pub context: MessageContext,
}

/// The (role, step) → body table plus step titles.
pub struct HelpCatalog {
    entries: HashMap<(UserRole, u32), String>,
}

impl Default for HelpCatalog {
    fn default() -> Self {
        Self::baseline()
    }
}

impl HelpCatalog {
    /// An empty catalog; every compose falls back to the generic body.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The built-in table covering the three roles across the five
    /// baseline steps.
    pub fn baseline() -> Self {
        use UserRole::{Admin, BusinessUser, Developer};

        let mut catalog = Self::empty();

        catalog.insert(Developer, 1, "Your workspace holds projects, API credentials, and extraction settings. Most developers start by naming it after their repo or service.");
        catalog.insert(Developer, 2, "Drag in any PDF, DOCX, or plain-text file up to 10 MB. If you plan to wire this up programmatically, the same validation runs on the upload endpoint.");
        catalog.insert(Developer, 3, "The extracted summary is editable. Fix anything the model got wrong; your edits feed the task list on the next step.");
        catalog.insert(Developer, 4, "Tasks extracted from your document can be edited, reordered, or removed. Unchecked items stay out of the final list.");
        catalog.insert(Developer, 5, "You are set. Invite teammates now, or grab an API token from settings to automate uploads.");

        catalog.insert(BusinessUser, 1, "Your workspace is where your documents and task lists live. A name and a short team description are all you need to get going.");
        catalog.insert(BusinessUser, 2, "Drop in a contract, report, or meeting notes. The summary on the next step usually lands within a minute.");
        catalog.insert(BusinessUser, 3, "Skim the summary and correct anything that reads wrong. It only takes a moment and makes your task list much more useful.");
        catalog.insert(BusinessUser, 4, "This is the to-do list pulled from your document. Keep what is useful, remove what is not, and confirm when it looks right.");
        catalog.insert(BusinessUser, 5, "That is the whole flow. Inviting a colleague takes one email address, and they will see everything you just set up.");

        catalog.insert(Admin, 1, "Workspace settings here become the defaults for everyone you invite later. Roles and permissions can be adjusted at any time.");
        catalog.insert(Admin, 2, "Uploads are scoped to this workspace. If your team handles sensitive documents, retention settings live under workspace administration.");
        catalog.insert(Admin, 3, "Review the summary for accuracy before approving it. Approved summaries become visible to everyone in the workspace.");
        catalog.insert(Admin, 4, "Confirming the task list publishes it to the workspace. You can assign owners to individual tasks now or later.");
        catalog.insert(Admin, 5, "Last step: invite your team and set their roles. Invitations can be resent or revoked from the members page.");

        catalog
    }

    /// Add or replace the body for a (role, step) pair.
    pub fn insert(&mut self, role: UserRole, step_number: u32, body: impl Into<String>) {
        self.entries.insert((role, step_number), body.into());
    }

    /// The body mapped for this role and step, if any.
    pub fn lookup(&self, role: UserRole, step_number: u32) -> Option<&str> {
        self.entries
            .get(&(role, step_number))
            .map(String::as_str)
    }

    /// Display title for a step; out-of-range steps get a plain label.
    pub fn step_title(&self, step_number: u32) -> String {
        STEP_TITLES
            .get(step_number.saturating_sub(1) as usize)
            .map(|title| (*title).to_string())
            .unwrap_or_else(|| format!("Step {step_number}"))
    }

    /// Compose the full message envelope for a context snapshot.
    pub fn compose(&self, ctx: &StepContext) -> HelpMessage {
        let body = ctx
            .user_role
            .and_then(|role| self.lookup(role, ctx.step_number));

        let (message_type, mut content) = match body {
            Some(body) => (MessageKind::ContextualHelp, body.to_string()),
            None => (MessageKind::GenericHelp, GENERIC_BODY.to_string()),
        };

        if ctx.time_on_step_seconds > LONG_STEP_SECONDS {
            content.push_str(
                " You have been on this step for a while. You can skip it for \
                 now, or open the step resources for a detailed guide.",
            );
        }
        if ctx.previous_interventions > 0 {
            content.push_str(
                " Still finding this tricky? We can connect you with \
                 additional support.",
            );
        }

        HelpMessage {
            id: Uuid::new_v4(),
            message_type,
            content,
            dismissible: true,
            context: MessageContext {
                step_number: ctx.step_number,
                step_title: ctx.step_title.clone(),
                user_role: ctx
                    .user_role
                    .map(|role| role.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                engagement_score: ctx.engagement_score,
                time_on_step: ctx.time_on_step_seconds,
            },
        }
    }
}
