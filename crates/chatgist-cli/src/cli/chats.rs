//! `chatgist chats`: chat listing views.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use chatgist_core::context::OperationContext;
use chatgist_types::chat::{ChatOverview, PeerKind};

use crate::state::AppState;

/// Which listing to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatView {
    All,
    Unread,
    Favorites,
}

impl ChatView {
    pub fn from_flags(unread: bool, favorites: bool) -> Self {
        match (unread, favorites) {
            (true, _) => ChatView::Unread,
            (false, true) => ChatView::Favorites,
            (false, false) => ChatView::All,
        }
    }
}

/// List chats in a table, or as JSON.
pub async fn list_chats(
    state: &AppState,
    view: ChatView,
    json: bool,
    ctx: &OperationContext,
) -> Result<()> {
    let chats = match view {
        ChatView::All => state.service.list_chats(ctx).await?,
        ChatView::Unread => state.service.unread_chats(ctx).await?,
        ChatView::Favorites => state.service.favorite_chats(ctx).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&chats)?);
        return Ok(());
    }

    if chats.is_empty() {
        let hint = match view {
            ChatView::All => "No chats in the export.".to_string(),
            ChatView::Unread => format!(
                "No chats with {} or more unread messages.",
                state.config.cache.unread_threshold
            ),
            ChatView::Favorites => {
                "No favorites. Add chat ids to [cache] favorites in the config.".to_string()
            }
        };
        println!();
        println!("  {} {hint}", style("i").blue().bold());
        println!();
        return Ok(());
    }

    println!("{}", chat_table(&chats));
    Ok(())
}

fn chat_table(chats: &[ChatOverview]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Title").fg(Color::White),
        Cell::new("Kind").fg(Color::White),
        Cell::new("Unread").fg(Color::White),
        Cell::new("Gists").fg(Color::White),
    ]);

    for chat in chats {
        let title = if chat.is_favorite {
            format!("★ {}", chat.title)
        } else {
            chat.title.clone()
        };
        let unread = match chat.unread_count {
            0 => Cell::new("0").fg(Color::DarkGrey),
            n => Cell::new(n).fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(chat.id),
            Cell::new(title),
            Cell::new(kind_label(chat.kind)),
            unread,
            Cell::new(chat.gist_batches),
        ]);
    }
    table
}

fn kind_label(kind: PeerKind) -> &'static str {
    match kind {
        PeerKind::User => "● user",
        PeerKind::Group => "◆ group",
        PeerKind::Channel => "▶ channel",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, unread: u32, favorite: bool) -> ChatOverview {
        ChatOverview {
            id,
            title: format!("chat {id}"),
            kind: PeerKind::Group,
            unread_count: unread,
            is_favorite: favorite,
            gist_batches: 0,
        }
    }

    #[test]
    fn view_flags() {
        assert_eq!(ChatView::from_flags(false, false), ChatView::All);
        assert_eq!(ChatView::from_flags(true, false), ChatView::Unread);
        assert_eq!(ChatView::from_flags(false, true), ChatView::Favorites);
    }

    #[test]
    fn table_marks_favorites() {
        let rendered = chat_table(&[row(1, 12, true), row(2, 0, false)]).to_string();
        assert!(rendered.contains("★ chat 1"));
        assert!(rendered.contains("chat 2"));
        assert!(!rendered.contains("★ chat 2"));
        assert!(rendered.contains("12"));
    }
}
