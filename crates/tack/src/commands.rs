use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, anyhow, bail};
use serde::Serialize;
use tack_app::{CreateCardRequest, ExtractionJob, ExtractionQueue, ExtractionReport, WriteResult};
use tack_core::CardRecord;
use tack_core::event::Actor;
use tack_core::filter::{AssignmentStatus, FilterParams};
use tack_core::id::{AccountId, BoardId, CardId, TagId, UserId};
use tack_core::model::{Comment, ContentRef, RichText};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::workspace::Workspace;
use crate::{Command, LsArgs};

/// Execute one command against the project in `dir`, then drain any extraction
/// work the command queued.
pub fn run(dir: &Path, acting_as: Option<&str>, command: Command) -> Result<()> {
    let workspace = Workspace::open(dir)?;
    let jobs = execute(&workspace, acting_as, command)?;
    drain_extractions(&workspace, jobs)
}

fn execute(workspace: &Workspace, acting_as: Option<&str>, command: Command) -> Result<Vec<ExtractionJob>> {
    match command {
        Command::Init {
            name,
            email,
            board,
            columns,
        } => {
            let user = workspace.init(&name, &email, &board, &columns)?;
            println!("initialized: {} <{email}> on board {board}", user.name);
            Ok(Vec::new())
        }
        Command::AddUser { name, email, boards } => {
            let user = workspace.add_user(&name, &email, &boards)?;
            println!("added user: {} ({})", user.name, user.id);
            Ok(Vec::new())
        }
        other => {
            let actor = workspace.actor(acting_as)?;
            execute_as(workspace, &actor, other)
        }
    }
}

fn execute_as(workspace: &Workspace, actor: &Actor, command: Command) -> Result<Vec<ExtractionJob>> {
    let writer = workspace.writer();
    let mut jobs = Vec::new();
    match command {
        Command::AddBoard {
            name,
            columns,
            members,
        } => {
            let board = workspace.add_board(actor, &name, &columns, &members)?;
            println!("created board: {} ({})", board.name, board.id);
        }
        Command::New {
            board,
            title,
            description,
            column,
            tags,
        } => {
            let board = workspace.board(actor.account, &board)?;
            let result = writer.create_card(
                actor,
                CreateCardRequest {
                    board: board.id,
                    title,
                    description: description.map(RichText::from_markup).unwrap_or_default(),
                    column,
                    tags,
                },
            )?;
            let card = &result.record.card;
            println!("created card: #{} {}", card.number, card.title);
            jobs.push(ExtractionJob::new(*actor, ContentRef::Card(card.id)));
        }
        Command::Edit {
            card,
            title,
            description,
        } => {
            let id = workspace.card(actor, &card)?;
            let result = writer.update_card(actor, id, title.as_deref(), description.map(RichText::from_markup))?;
            println!("updated card: #{}", result.record.card.number);
            if result.description_changed {
                jobs.push(ExtractionJob::new(*actor, ContentRef::Card(id)));
            }
        }
        Command::Comment { card, message } => {
            let id = workspace.card(actor, &card)?;
            let result = writer.add_comment(actor, id, RichText::from_markup(message))?;
            println!("commented: #{} ({})", result.record.card.number, result.comment.id);
            jobs.push(ExtractionJob::new(*actor, ContentRef::Comment(result.comment.id)));
        }
        Command::Show { card } => {
            let id = workspace.card(actor, &card)?;
            let record = writer.load(actor, id)?;
            let comments = workspace.store.comments(actor.account, id)?;
            let names = Names::load(workspace, actor.account)?;
            let detail = CardDetail {
                card: CardView::build(workspace, &names, &record)?,
                description: record.card.description.plain_text.clone(),
                comments: comments.iter().map(|comment| CommentView::build(&names, comment)).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Command::Ls(args) => list(workspace, actor, &args)?,
        Command::Close { card } => {
            let id = workspace.card(actor, &card)?;
            report_write(workspace, "closed", &writer.close(actor, id)?)?;
        }
        Command::Reopen { card } => {
            let id = workspace.card(actor, &card)?;
            report_write(workspace, "reopened", &writer.reopen(actor, id)?)?;
        }
        Command::Postpone { card } => {
            let id = workspace.card(actor, &card)?;
            report_write(workspace, "postponed", &writer.postpone(actor, id)?)?;
        }
        Command::Resume { card } => {
            let id = workspace.card(actor, &card)?;
            report_write(workspace, "resumed", &writer.resume(actor, id)?)?;
        }
        Command::Triage { card } => {
            let id = workspace.card(actor, &card)?;
            report_write(workspace, "sent back to triage", &writer.send_back_to_triage(actor, id)?)?;
        }
        Command::Move { card, column } => {
            let id = workspace.card(actor, &card)?;
            report_write(workspace, "moved", &writer.move_to(actor, id, &column)?)?;
        }
        Command::Assign { card, email } => {
            let id = workspace.card(actor, &card)?;
            let user = workspace.user(actor.account, &email)?;
            report_write(workspace, "assignment toggled", &writer.toggle_assignment(actor, id, user.id)?)?;
        }
        Command::Tag { card, title } => {
            let id = workspace.card(actor, &card)?;
            report_write(workspace, "tag toggled", &writer.toggle_tag(actor, id, &title)?)?;
        }
        Command::Extract { card, force } => {
            let id = workspace.card(actor, &card)?;
            let (totals, unchanged) = extract_now(workspace, actor, id, force)?;
            println!(
                "extracted: {} mentions, {} links, {} watchers ({unchanged} sources unchanged)",
                totals.mentions.len(),
                totals.links.len(),
                totals.watchers.len(),
            );
        }
        Command::Init { .. } | Command::AddUser { .. } => {
            bail!("account setup does not run on behalf of a user");
        }
    }
    Ok(jobs)
}

fn report_write(workspace: &Workspace, verb: &str, result: &WriteResult) -> Result<()> {
    let number = result.record.card.number;
    if result.is_noop() {
        println!("unchanged: #{number}");
        return Ok(());
    }
    let label = workspace.query().column_label(&result.record)?;
    println!("{verb}: #{number} ({label})");
    Ok(())
}

/// Run extraction for a card and its comments synchronously. Returns the merged
/// report and how many sources were skipped as unchanged.
fn extract_now(workspace: &Workspace, actor: &Actor, card: CardId, force: bool) -> Result<(ExtractionReport, usize)> {
    let extractor = workspace.extractor();
    let mut sources = vec![ContentRef::Card(card)];
    sources.extend(
        workspace
            .store
            .comments(actor.account, card)?
            .into_iter()
            .map(|comment| ContentRef::Comment(comment.id)),
    );

    let mut totals = ExtractionReport::default();
    let mut unchanged = 0;
    for source in sources {
        let report = if force {
            extractor.extract_forced(actor, source)?
        } else {
            extractor.extract(actor, source)?
        };
        unchanged += usize::from(report.skipped);
        totals.mentions.extend(report.mentions);
        totals.links.extend(report.links);
        totals.watchers.extend(report.watchers);
        totals.events.extend(report.events);
    }
    Ok((totals, unchanged))
}

fn drain_extractions(workspace: &Workspace, jobs: Vec<ExtractionJob>) -> Result<()> {
    if jobs.is_empty() {
        return Ok(());
    }
    let extractor = workspace.extractor();
    let processed = tokio::runtime::Runtime::new()?.block_on(async move {
        let queue = ExtractionQueue::spawn(extractor);
        for job in jobs {
            queue.enqueue(job)?;
        }
        queue.shutdown().await
    })?;
    info!(processed, "Extraction jobs drained");
    Ok(())
}

fn list(workspace: &Workspace, actor: &Actor, args: &LsArgs) -> Result<()> {
    let params = filter_params(workspace, actor, args)?;
    let filters = workspace.filters();
    let filter = if args.save {
        let saved = filters.remember(actor, &params)?;
        println!("saved filter: {}", saved.id);
        saved
    } else {
        filters.from_params(actor, &params)?
    };

    let cards = workspace.query().run(actor, &params)?;
    if cards.is_empty() {
        if filter.is_empty() {
            println!("No cards found");
        } else {
            println!("No cards matched the provided filters");
        }
        return Ok(());
    }

    let names = Names::load(workspace, actor.account)?;
    let views = cards
        .iter()
        .map(|record| CardView::build(workspace, &names, record))
        .collect::<Result<Vec<_>>>()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&views)?);
    } else {
        render_card_table(&views);
    }
    Ok(())
}

fn filter_params(workspace: &Workspace, actor: &Actor, args: &LsArgs) -> Result<FilterParams> {
    let board_ids = args
        .boards
        .iter()
        .map(|name| workspace.board(actor.account, name).map(|board| board.id))
        .collect::<Result<Vec<BoardId>>>()?;
    let users = |emails: &[String]| -> Result<Option<Vec<UserId>>> {
        if emails.is_empty() {
            return Ok(None);
        }
        workspace.known_users(actor.account, emails).map(Some)
    };

    Ok(FilterParams {
        board_ids,
        assignment_status: args.unassigned.then_some(AssignmentStatus::Unassigned),
        assignee_ids: users(&args.assignees)?,
        creator_ids: users(&args.creators)?,
        closer_ids: users(&args.closers)?.unwrap_or_default(),
        column: args.column.clone(),
        tags: (!args.tags.is_empty()).then(|| args.tags.clone()),
        creation: args.created.clone(),
        closure: args.closed.clone(),
        status: args.status.clone(),
        sort: args.sort.clone(),
        terms: args.terms.clone(),
        ..FilterParams::default()
    })
}

fn render_card_table(cards: &[CardView]) {
    println!("# | Board | Column | Title | Tags | Assignees | Updated");
    println!("- | ----- | ------ | ----- | ---- | --------- | -------");
    for card in cards {
        println!(
            "{} | {} | {} | {} | {} | {} | {}",
            card.number,
            card.board,
            card.column,
            card.title,
            joined(&card.tags),
            joined(&card.assignees),
            card.updated_at
        );
    }
}

fn joined(values: &[String]) -> String {
    if values.is_empty() {
        "-".to_owned()
    } else {
        values.join(", ")
    }
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}

/// Display names for ids appearing in output.
struct Names {
    boards: BTreeMap<BoardId, String>,
    users: BTreeMap<UserId, String>,
    tags: BTreeMap<TagId, String>,
}

impl Names {
    fn load(workspace: &Workspace, account: AccountId) -> Result<Self> {
        Ok(Self {
            boards: workspace
                .store
                .boards(account)?
                .into_iter()
                .map(|board| (board.id, board.name))
                .collect(),
            users: workspace
                .store
                .users(account)?
                .into_iter()
                .map(|user| (user.id, user.name))
                .collect(),
            tags: workspace
                .store
                .tags(account)?
                .into_iter()
                .map(|tag| (tag.id, tag.title))
                .collect(),
        })
    }

    fn user(&self, id: UserId) -> String {
        self.users.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }
}

#[derive(Debug, Serialize)]
struct CardView {
    number: String,
    board: String,
    column: String,
    title: String,
    tags: Vec<String>,
    assignees: Vec<String>,
    created_at: String,
    updated_at: String,
}

impl CardView {
    fn build(workspace: &Workspace, names: &Names, record: &CardRecord) -> Result<Self> {
        let card = &record.card;
        Ok(Self {
            number: format!("#{}", card.number),
            board: names
                .boards
                .get(&card.board)
                .cloned()
                .ok_or_else(|| anyhow!("board {} missing for card #{}", card.board, card.number))?,
            column: workspace.query().column_label(record)?,
            title: card.title.clone(),
            tags: card.tags.iter().filter_map(|tag| names.tags.get(tag).cloned()).collect(),
            assignees: card.assignees.iter().map(|user| names.user(*user)).collect(),
            created_at: rfc3339(card.created_at),
            updated_at: rfc3339(card.updated_at),
        })
    }
}

#[derive(Debug, Serialize)]
struct CommentView {
    author: String,
    created_at: String,
    body: String,
}

impl CommentView {
    fn build(names: &Names, comment: &Comment) -> Self {
        Self {
            author: names.user(comment.creator),
            created_at: rfc3339(comment.created_at),
            body: comment.body.plain_text.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CardDetail {
    #[serde(flatten)]
    card: CardView,
    description: String,
    comments: Vec<CommentView>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use tempfile::tempdir;

    fn project() -> Result<(tempfile::TempDir, Workspace)> {
        let dir = tempdir()?;
        let workspace = Workspace::open(dir.path())?;
        workspace.init("Alice Doe", "alice@example.com", "Product", &["Backlog".into(), "Doing".into()])?;
        workspace.add_user("Kevin Mc", "kmc@example.com", &["Product".into()])?;
        Ok((dir, workspace))
    }

    fn alice(workspace: &Workspace) -> Actor {
        workspace.actor(Some("alice@example.com")).expect("alice")
    }

    #[test]
    fn new_card_queues_extraction_and_drains_it() -> Result<()> {
        let (_dir, workspace) = project()?;
        let actor = alice(&workspace);
        let jobs = execute_as(
            &workspace,
            &actor,
            Command::New {
                board: "product".into(),
                title: "Review".into(),
                description: Some("<p>@kmc please look</p>".into()),
                column: Some("Doing".into()),
                tags: vec!["#Bug".into()],
            },
        )?;
        assert_eq!(jobs.len(), 1);
        drain_extractions(&workspace, jobs)?;

        let tables = workspace.store.snapshot()?;
        assert_eq!(tables.mentions.len(), 1);
        assert_eq!(tables.tags.values().map(|tag| tag.title.as_str()).collect::<Vec<_>>(), vec!["bug"]);
        Ok(())
    }

    #[test]
    fn transitions_resolve_cards_by_number() -> Result<()> {
        let (_dir, workspace) = project()?;
        let actor = alice(&workspace);
        execute_as(
            &workspace,
            &actor,
            Command::New {
                board: "Product".into(),
                title: "Ship it".into(),
                description: None,
                column: None,
                tags: Vec::new(),
            },
        )?;
        for command in [
            Command::Move {
                card: "#1".into(),
                column: "doing".into(),
            },
            Command::Close { card: "1".into() },
            Command::Close { card: "1".into() },
        ] {
            let jobs = execute_as(&workspace, &actor, command)?;
            assert!(jobs.is_empty());
        }
        let id = workspace.card(&actor, "#1")?;
        let record = workspace.writer().load(&actor, id)?;
        assert!(record.closure.is_some());
        assert_eq!(workspace.query().column_label(&record)?, "DONE");
        Ok(())
    }

    #[test]
    fn unknown_people_narrow_the_listing_to_nothing() -> Result<()> {
        let (_dir, workspace) = project()?;
        let actor = alice(&workspace);
        let params = filter_params(
            &workspace,
            &actor,
            &LsArgs {
                assignees: vec!["nobody@example.com".into()],
                creators: vec!["KMC@example.com".into()],
                ..LsArgs::default()
            },
        )?;
        assert_eq!(params.assignee_ids, Some(Vec::new()));
        assert_eq!(params.creator_ids.map(|ids| ids.len()), Some(1));
        assert_eq!(params.tags, None);
        Ok(())
    }

    #[test]
    fn saving_the_same_listing_twice_keeps_one_filter() -> Result<()> {
        let (_dir, workspace) = project()?;
        let actor = alice(&workspace);
        let args = LsArgs {
            status: Some("closed".into()),
            terms: vec!["urgent".into()],
            save: true,
            ..LsArgs::default()
        };
        list(&workspace, &actor, &args)?;
        list(&workspace, &actor, &args)?;
        assert_eq!(workspace.store.snapshot()?.filters.len(), 1);
        Ok(())
    }

    #[test]
    fn setup_commands_need_no_acting_user() -> Result<()> {
        let dir = tempdir()?;
        let workspace = Workspace::open(dir.path())?;
        execute(
            &workspace,
            None,
            Command::Init {
                name: "Alice".into(),
                email: "alice@example.com".into(),
                board: "Main".into(),
                columns: Vec::new(),
            },
        )?;
        let err = execute(&workspace, None, Command::Show { card: "#1".into() }).expect_err("needs --as");
        assert!(err.to_string().contains("--as"));
        Ok(())
    }

    #[test]
    fn setup_commands_are_refused_on_behalf_of_a_user() -> Result<()> {
        let (_dir, workspace) = project()?;
        let actor = alice(&workspace);
        let err = execute_as(
            &workspace,
            &actor,
            Command::AddUser {
                name: "Bob".into(),
                email: "bob@example.com".into(),
                boards: Vec::new(),
            },
        )
        .expect_err("setup is not an actor command");
        assert!(err.to_string().contains("account setup"));
        assert!(workspace.user(actor.account, "bob@example.com").is_err());
        Ok(())
    }
}
