//! Incremental masonry layout.
//!
//! Cards are placed greedily into the column with the smallest estimated
//! height. When the card list only grows at the front (live pushes) or at the
//! back (pagination), existing cards keep their column and row and only the
//! new cards are placed. Anything else falls back to a full redistribute.

use crate::card::LinkCard;
use crate::classify::{LinkKind, MediaKind};
use crate::settings::DisplayMode;
use std::collections::VecDeque;
use std::sync::Arc;

/// Caption strip under every card.
const CAPTION_HEIGHT: u32 = 48;

/// Estimated rendered height of a card body, by kind.
pub fn estimated_height(card: &LinkCard) -> u32 {
    let body = if card.display == DisplayMode::Text {
        40
    } else {
        match (&card.media, &card.kind) {
            (MediaKind::Image, _) => 300,
            (MediaKind::Video, _) => 280,
            (MediaKind::Audio, _) => 80,
            (MediaKind::Link, _) => 40,
            (MediaKind::Embed, LinkKind::Twitter { .. }) => 400,
            (MediaKind::Embed, LinkKind::Reddit { .. }) => 420,
            (MediaKind::Embed, LinkKind::TikTok { .. }) => 575,
            (MediaKind::Embed, LinkKind::Spotify { .. }) => 152,
            (MediaKind::Embed, LinkKind::Imgur { .. }) => 360,
            (MediaKind::Embed, _) => 260,
        }
    };
    body + CAPTION_HEIGHT
}

/// Columns that fit `viewport_width`, clamped to `1..=max_columns`.
pub fn column_count_for_width(viewport_width: u32, min_column_width: u32, max_columns: usize) -> usize {
    let fit = (viewport_width / min_column_width.max(1)) as usize;
    fit.clamp(1, max_columns.max(1))
}

/// Full greedy placement: card indices per column. Pure in `(heights,
/// column_count)`; ties go to the lowest column index.
pub fn redistribute(heights: &[u32], column_count: usize) -> Vec<Vec<usize>> {
    let column_count = column_count.max(1);
    let mut columns = vec![Vec::new(); column_count];
    let mut totals = vec![0u64; column_count];
    for (index, &height) in heights.iter().enumerate() {
        let col = shortest(&totals);
        columns[col].push(index);
        totals[col] += u64::from(height);
    }
    columns
}

fn shortest(totals: &[u64]) -> usize {
    totals
        .iter()
        .enumerate()
        .min_by_key(|&(i, &h)| (h, i))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// What the last [`MasonryLayout::layout`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutChange {
    Unchanged,
    /// Same ids in the same order; some cards were re-derived in place.
    Updated,
    Prepended(usize),
    Appended(usize),
    Redistributed,
}

#[derive(Debug, Default, Clone)]
struct Column {
    cards: VecDeque<Arc<LinkCard>>,
    height: u64,
}

#[derive(Debug, Default)]
pub struct MasonryLayout {
    column_count: usize,
    columns: Vec<Column>,
    order: Vec<Arc<LinkCard>>,
}

impl MasonryLayout {
    pub fn new(column_count: usize) -> Self {
        let column_count = column_count.max(1);
        Self {
            column_count,
            columns: vec![Column::default(); column_count],
            order: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Card ids per column, top to bottom.
    pub fn column_ids(&self) -> Vec<Vec<String>> {
        self.columns
            .iter()
            .map(|c| c.cards.iter().map(|card| card.id.clone()).collect())
            .collect()
    }

    /// Estimated pixel height of each column.
    pub fn column_heights(&self) -> Vec<u64> {
        self.columns.iter().map(|c| c.height).collect()
    }

    /// `(column, row)` of a card.
    pub fn position_of(&self, card_id: &str) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(col, c)| {
            c.cards
                .iter()
                .position(|card| card.id == card_id)
                .map(|row| (col, row))
        })
    }

    /// Lay out `cards` (feed order) into `column_count` columns.
    pub fn layout(&mut self, cards: Vec<Arc<LinkCard>>, column_count: usize) -> LayoutChange {
        let column_count = column_count.max(1);
        if column_count != self.column_count || self.order.is_empty() {
            let unchanged = column_count == self.column_count && cards.is_empty();
            self.column_count = column_count;
            self.full_redistribute(cards);
            return if unchanged {
                LayoutChange::Unchanged
            } else {
                LayoutChange::Redistributed
            };
        }

        let old_len = self.order.len();
        let new_len = cards.len();

        if new_len == old_len && same_ids(&self.order, &cards) {
            return if self.replace_changed(&cards) {
                self.order = cards;
                LayoutChange::Updated
            } else {
                LayoutChange::Unchanged
            };
        }

        if new_len > old_len {
            let added = new_len - old_len;
            if same_ids(&self.order, &cards[added..]) {
                self.replace_changed(&cards[added..]);
                self.prepend(&cards[..added]);
                self.order = cards;
                return LayoutChange::Prepended(added);
            }
            if same_ids(&self.order, &cards[..old_len]) {
                self.replace_changed(&cards[..old_len]);
                self.append(&cards[old_len..]);
                self.order = cards;
                return LayoutChange::Appended(added);
            }
        }

        self.full_redistribute(cards);
        LayoutChange::Redistributed
    }

    fn full_redistribute(&mut self, cards: Vec<Arc<LinkCard>>) {
        let heights: Vec<u32> = cards.iter().map(|c| estimated_height(c)).collect();
        let assignment = redistribute(&heights, self.column_count);
        self.columns = assignment
            .into_iter()
            .map(|indices| Column {
                height: indices.iter().map(|&i| u64::from(heights[i])).sum(),
                cards: indices.into_iter().map(|i| Arc::clone(&cards[i])).collect(),
            })
            .collect();
        self.order = cards;
    }

    /// New cards go above existing ones; within a column they keep feed order.
    fn prepend(&mut self, new_cards: &[Arc<LinkCard>]) {
        let mut inserted = vec![0usize; self.columns.len()];
        for card in new_cards {
            let col = self.shortest_column();
            let column = &mut self.columns[col];
            column.cards.insert(inserted[col], Arc::clone(card));
            column.height += u64::from(estimated_height(card));
            inserted[col] += 1;
        }
    }

    fn append(&mut self, new_cards: &[Arc<LinkCard>]) {
        for card in new_cards {
            let col = self.shortest_column();
            let column = &mut self.columns[col];
            column.cards.push_back(Arc::clone(card));
            column.height += u64::from(estimated_height(card));
        }
    }

    fn shortest_column(&self) -> usize {
        let totals: Vec<u64> = self.columns.iter().map(|c| c.height).collect();
        shortest(&totals)
    }

    /// Swap re-derived cards into their existing slots. Returns whether any
    /// card was replaced.
    fn replace_changed(&mut self, cards: &[Arc<LinkCard>]) -> bool {
        let mut changed = false;
        for (old, new) in self.order.iter().zip(cards) {
            if Arc::ptr_eq(old, new) {
                continue;
            }
            changed = true;
            for column in &mut self.columns {
                if let Some(slot) = column.cards.iter_mut().find(|c| c.id == new.id) {
                    column.height = column.height - u64::from(estimated_height(slot))
                        + u64::from(estimated_height(new));
                    *slot = Arc::clone(new);
                    break;
                }
            }
        }
        changed
    }
}

fn same_ids(a: &[Arc<LinkCard>], b: &[Arc<LinkCard>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id == y.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardOwner;

    fn card(id: &str, media: MediaKind) -> Arc<LinkCard> {
        Arc::new(LinkCard {
            id: id.to_string(),
            message_id: format!("m-{id}"),
            source_url: format!("https://a.com/{id}"),
            url: format!("https://a.com/{id}"),
            kind: match media {
                MediaKind::Image => LinkKind::Image,
                MediaKind::Video => LinkKind::Video,
                _ => LinkKind::Link,
            },
            media,
            embed_url: None,
            directly_playable: false,
            is_trusted: false,
            is_streaming: false,
            display: DisplayMode::Embed,
            reload_nonce: 0,
            owner: CardOwner {
                platform: "dgg".into(),
                channel: "c".into(),
                nick: "n".into(),
                date: 1,
                text: String::new(),
                kick_emotes: None,
            },
        })
    }

    fn cards(n: usize) -> Vec<Arc<LinkCard>> {
        (0..n)
            .map(|i| {
                let media = if i % 3 == 0 { MediaKind::Image } else { MediaKind::Link };
                card(&format!("c{i}"), media)
            })
            .collect()
    }

    #[test]
    fn redistribute_is_deterministic() {
        let heights = [300, 100, 100, 50, 400, 10];
        assert_eq!(redistribute(&heights, 3), redistribute(&heights, 3));
        assert_eq!(
            redistribute(&heights, 3),
            vec![vec![0], vec![1, 3, 5], vec![2, 4]]
        );
    }

    #[test]
    fn column_heights_track_placed_cards() {
        let all = cards(7);
        let mut layout = MasonryLayout::new(3);
        layout.layout(all.clone(), 3);
        let heights = layout.column_heights();
        assert_eq!(heights.len(), 3);
        let total: u64 = all.iter().map(|c| u64::from(estimated_height(c))).sum();
        assert_eq!(heights.iter().sum::<u64>(), total);
    }

    #[test]
    fn append_keeps_existing_positions() {
        let initial = cards(10);
        let mut layout = MasonryLayout::new(3);
        assert_eq!(layout.layout(initial.clone(), 3), LayoutChange::Redistributed);
        let before = layout.column_ids();

        let mut extended = initial.clone();
        extended.extend((10..13).map(|i| card(&format!("c{i}"), MediaKind::Video)));
        assert_eq!(layout.layout(extended, 3), LayoutChange::Appended(3));

        let after = layout.column_ids();
        for (old_col, new_col) in before.iter().zip(&after) {
            assert_eq!(&new_col[..old_col.len()], old_col.as_slice());
        }
        for c in &initial {
            let (col, row) = layout.position_of(&c.id).unwrap();
            assert_eq!(before[col][row], c.id);
        }
    }

    #[test]
    fn prepend_keeps_existing_order_and_new_order() {
        let initial = cards(6);
        let mut layout = MasonryLayout::new(2);
        layout.layout(initial.clone(), 2);
        let before = layout.column_ids();

        let mut with_live = vec![card("live0", MediaKind::Image), card("live1", MediaKind::Image)];
        with_live.extend(initial.iter().cloned());
        assert_eq!(layout.layout(with_live, 2), LayoutChange::Prepended(2));

        let after = layout.column_ids();
        for (old_col, new_col) in before.iter().zip(&after) {
            assert!(new_col.ends_with(old_col));
        }
        // both live cards above every old card in whichever columns they landed
        for id in ["live0", "live1"] {
            let (col, row) = layout.position_of(id).unwrap();
            assert!(row < after[col].len() - before[col].len());
        }
    }

    #[test]
    fn identical_input_is_unchanged() {
        let list = cards(5);
        let mut layout = MasonryLayout::new(2);
        layout.layout(list.clone(), 2);
        assert_eq!(layout.layout(list, 2), LayoutChange::Unchanged);
    }

    #[test]
    fn rederived_card_is_replaced_in_place() {
        let list = cards(4);
        let mut layout = MasonryLayout::new(2);
        layout.layout(list.clone(), 2);
        let pos = layout.position_of("c2").unwrap();

        let mut next = list.clone();
        let mut reloaded = (*next[2]).clone();
        reloaded.reload_nonce = 1;
        next[2] = Arc::new(reloaded);
        assert_eq!(layout.layout(next, 2), LayoutChange::Updated);
        assert_eq!(layout.position_of("c2"), Some(pos));
    }

    #[test]
    fn removal_or_column_change_redistributes() {
        let list = cards(6);
        let mut layout = MasonryLayout::new(3);
        layout.layout(list.clone(), 3);

        let mut removed = list.clone();
        removed.remove(2);
        assert_eq!(layout.layout(removed.clone(), 3), LayoutChange::Redistributed);
        assert_eq!(layout.layout(removed, 2), LayoutChange::Redistributed);
        assert_eq!(layout.column_count(), 2);
    }

    #[test]
    fn column_count_from_width() {
        assert_eq!(column_count_for_width(1280, 320, 6), 4);
        assert_eq!(column_count_for_width(100, 320, 6), 1);
        assert_eq!(column_count_for_width(10_000, 320, 6), 6);
    }
}
