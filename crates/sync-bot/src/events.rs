//! GitHub webhook deliveries
//!
//! A delivery is the `X-GitHub-Event` name plus the JSON payload, as
//! forwarded by the HTTP front end (one JSON object per line). Comment
//! payloads only carry the issue, so turning them into an [`Event`] needs
//! one extra forge call for the pull request.

use crate::dispatcher::{Event, EventKind};
use anyhow::Context;
use forge_client::{comment_from_json, pull_request_from_json, Comment, ForgeClient};
use serde::Deserialize;

/// One forwarded webhook delivery
#[derive(Debug, Clone, Deserialize)]
pub struct Delivery {
    /// Value of the `X-GitHub-Event` header
    pub event: String,
    /// Value of the `X-GitHub-Delivery` header, if forwarded
    #[serde(default)]
    pub id: Option<String>,
    pub payload: serde_json::Value,
}

/// A delivery after decoding the payload
#[derive(Debug)]
pub enum Decoded {
    Ready(Event),
    /// A comment on a pull request whose details still have to be fetched
    CommentOnPullRequest {
        owner: String,
        repo: String,
        number: u64,
        comment: Comment,
    },
    /// Nothing for the bot to do
    Ignored(String),
}

#[derive(Deserialize)]
struct WireOwner {
    login: String,
}

#[derive(Deserialize)]
struct WireRepository {
    name: String,
    owner: WireOwner,
}

#[derive(Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: serde_json::Value,
    repository: WireRepository,
}

#[derive(Deserialize)]
struct WireIssue {
    number: u64,
    /// Present only when the issue is a pull request
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct IssueCommentPayload {
    action: String,
    issue: WireIssue,
    comment: serde_json::Value,
    repository: WireRepository,
}

/// Decode a delivery without talking to the forge
pub fn decode(delivery: &Delivery) -> serde_json::Result<Decoded> {
    match delivery.event.as_str() {
        "pull_request" => {
            let payload: PullRequestPayload = serde_json::from_value(delivery.payload.clone())?;
            let pull_request = pull_request_from_json(payload.pull_request)?;
            let kind = match payload.action.as_str() {
                "opened" | "reopened" => EventKind::PullRequestOpened,
                "synchronize" | "edited" => EventKind::PullRequestUpdated,
                "closed" if pull_request.is_merged() => EventKind::PullRequestMerged,
                "closed" => EventKind::PullRequestClosed,
                other => {
                    return Ok(Decoded::Ignored(format!("pull_request action {}", other)));
                }
            };
            Ok(Decoded::Ready(Event {
                owner: payload.repository.owner.login,
                repo: payload.repository.name,
                pull_request,
                kind,
            }))
        }
        "issue_comment" => {
            let payload: IssueCommentPayload = serde_json::from_value(delivery.payload.clone())?;
            if payload.action != "created" {
                return Ok(Decoded::Ignored(format!(
                    "issue_comment action {}",
                    payload.action
                )));
            }
            if payload.issue.pull_request.is_none() {
                return Ok(Decoded::Ignored(format!(
                    "comment on issue #{}",
                    payload.issue.number
                )));
            }
            Ok(Decoded::CommentOnPullRequest {
                owner: payload.repository.owner.login,
                repo: payload.repository.name,
                number: payload.issue.number,
                comment: comment_from_json(payload.comment)?,
            })
        }
        other => Ok(Decoded::Ignored(format!("event {}", other))),
    }
}

/// Finish decoding, fetching the pull request a comment belongs to
pub async fn resolve(decoded: Decoded, forge: &dyn ForgeClient) -> anyhow::Result<Option<Event>> {
    match decoded {
        Decoded::Ready(event) => Ok(Some(event)),
        Decoded::CommentOnPullRequest {
            owner,
            repo,
            number,
            comment,
        } => {
            let pull_request = forge
                .get_pull_request(&owner, &repo, number)
                .await
                .with_context(|| format!("Get pull request {}/{}#{} failed", owner, repo, number))?;
            Ok(Some(Event {
                owner,
                repo,
                pull_request,
                kind: EventKind::CommentPosted(comment),
            }))
        }
        Decoded::Ignored(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{
        comment_json, open_pull_request, pull_request_json, repository_json, FakeForge,
    };
    use serde_json::json;

    fn pull_request_delivery(action: &str, state: &str, merged: bool) -> Delivery {
        Delivery {
            event: "pull_request".to_string(),
            id: None,
            payload: json!({
                "action": action,
                "number": 7,
                "pull_request": pull_request_json(7, "master", state, merged, None),
                "repository": repository_json()
            }),
        }
    }

    fn comment_delivery(action: &str, on_pull_request: bool) -> Delivery {
        let mut issue = json!({"number": 7});
        if on_pull_request {
            issue["pull_request"] =
                json!({"url": "https://api.github.com/repos/acme/widget/pulls/7"});
        }
        Delivery {
            event: "issue_comment".to_string(),
            id: Some("abc".to_string()),
            payload: json!({
                "action": action,
                "issue": issue,
                "comment": comment_json(1, "alice", "/sync stable"),
                "repository": repository_json()
            }),
        }
    }

    fn kind_of(delivery: &Delivery) -> Option<EventKind> {
        match decode(delivery).unwrap() {
            Decoded::Ready(event) => Some(event.kind),
            _ => None,
        }
    }

    #[test]
    fn test_pull_request_actions() {
        assert!(matches!(
            kind_of(&pull_request_delivery("opened", "open", false)),
            Some(EventKind::PullRequestOpened)
        ));
        assert!(matches!(
            kind_of(&pull_request_delivery("reopened", "open", false)),
            Some(EventKind::PullRequestOpened)
        ));
        assert!(matches!(
            kind_of(&pull_request_delivery("synchronize", "open", false)),
            Some(EventKind::PullRequestUpdated)
        ));
        assert!(matches!(
            kind_of(&pull_request_delivery("closed", "closed", true)),
            Some(EventKind::PullRequestMerged)
        ));
        assert!(matches!(
            kind_of(&pull_request_delivery("closed", "closed", false)),
            Some(EventKind::PullRequestClosed)
        ));
        assert!(kind_of(&pull_request_delivery("labeled", "open", false)).is_none());
    }

    #[test]
    fn test_pull_request_event_fields() {
        let Decoded::Ready(event) = decode(&pull_request_delivery("opened", "open", false)).unwrap()
        else {
            panic!("expected a ready event");
        };
        assert_eq!(event.owner, "acme");
        assert_eq!(event.repo, "widget");
        assert_eq!(event.pull_request.head_ref, "fix");
    }

    #[test]
    fn test_comments_outside_pull_requests_are_ignored() {
        assert!(matches!(
            decode(&comment_delivery("created", false)).unwrap(),
            Decoded::Ignored(_)
        ));
        assert!(matches!(
            decode(&comment_delivery("edited", true)).unwrap(),
            Decoded::Ignored(_)
        ));
        let ping = Delivery {
            event: "ping".to_string(),
            id: None,
            payload: json!({"zen": "Keep it logically awesome."}),
        };
        assert!(matches!(decode(&ping).unwrap(), Decoded::Ignored(_)));
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let delivery = Delivery {
            event: "pull_request".to_string(),
            id: None,
            payload: json!({"action": "opened"}),
        };
        assert!(decode(&delivery).is_err());
    }

    #[test]
    fn test_delivery_line() {
        let delivery: Delivery =
            serde_json::from_str(r#"{"event": "ping", "payload": {}}"#).unwrap();
        assert_eq!(delivery.event, "ping");
        assert_eq!(delivery.id, None);
    }

    #[tokio::test]
    async fn test_resolve_comment_fetches_pull_request() {
        let forge = FakeForge::with_branches(&["master"]);
        forge.state().pull_requests = vec![open_pull_request(7)];

        let decoded = decode(&comment_delivery("created", true)).unwrap();
        let event = resolve(decoded, forge.as_ref()).await.unwrap().unwrap();
        assert_eq!(event.pull_request.number, 7);
        match event.kind {
            EventKind::CommentPosted(comment) => {
                assert_eq!(comment.body, "/sync stable");
                assert_eq!(comment.user.login, "alice");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_pull_request_fails() {
        let forge = FakeForge::with_branches(&["master"]);
        let decoded = decode(&comment_delivery("created", true)).unwrap();
        assert!(resolve(decoded, forge.as_ref()).await.is_err());
    }
}
