use rusqlite::{params, Row};

use super::*;
use crate::types::{item_id, AgendaItem};

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        meeting_id: row.get(1)?,
        vendor_item_id: row.get(2)?,
        sequence: row.get(3)?,
        title: row.get(4)?,
        matter_number: row.get(5)?,
        summary: row.get(6)?,
    })
}

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<AttachmentRow> {
    Ok(AttachmentRow {
        id: row.get(0)?,
        item_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        metadata: row.get(4)?,
    })
}

impl Store {
    // =========================================================================
    // Items & attachments
    // =========================================================================

    /// Replace a meeting's item set (and the attachments hanging off it)
    /// atomically. Readers never see a half-loaded agenda.
    pub fn upsert_items_and_attachments(
        &self,
        meeting_id_val: &str,
        items: &[AgendaItem],
    ) -> Result<(), DbError> {
        self.with_transaction(|store| {
            // ON DELETE CASCADE clears attachments with their items.
            store.conn.execute(
                "DELETE FROM items WHERE meeting_id = ?1",
                params![meeting_id_val],
            )?;

            for item in items {
                let id = item_id(meeting_id_val, &item.vendor_item_id);
                store.conn.execute(
                    "INSERT INTO items (id, meeting_id, vendor_item_id, sequence, title, matter_number)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        meeting_id_val,
                        item.vendor_item_id,
                        item.sequence,
                        item.title,
                        item.matter_number
                    ],
                )?;

                for attachment in &item.attachments {
                    let metadata = if attachment.metadata.is_null() {
                        None
                    } else {
                        Some(attachment.metadata.to_string())
                    };
                    store.conn.execute(
                        "INSERT INTO attachments (id, item_id, name, url, metadata)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            uuid::Uuid::new_v4().to_string(),
                            id,
                            attachment.name,
                            attachment.url,
                            metadata
                        ],
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Items for a meeting in agenda order, each with its attachments.
    pub fn get_items_with_attachments(
        &self,
        meeting_id_val: &str,
    ) -> Result<Vec<(ItemRow, Vec<AttachmentRow>)>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, meeting_id, vendor_item_id, sequence, title, matter_number, summary
             FROM items WHERE meeting_id = ?1 ORDER BY sequence",
        )?;
        let rows = stmt.query_map(params![meeting_id_val], item_from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }

        let mut result = Vec::with_capacity(items.len());
        for item in items {
            let attachments = self.get_attachments(&item.id)?;
            result.push((item, attachments));
        }
        Ok(result)
    }

    pub fn get_attachments(&self, item_id_val: &str) -> Result<Vec<AttachmentRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, item_id, name, url, metadata
             FROM attachments WHERE item_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![item_id_val], attachment_from_row)?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    pub fn set_item_summary(&self, item_id_val: &str, summary: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE items SET summary = ?2 WHERE id = ?1",
            params![item_id_val, summary],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{City, CityStatus};
    use crate::types::{AttachmentRef, MeetingSource, NormalizedMeeting, Vendor};
    use chrono::{TimeZone, Utc};

    fn store_with_meeting() -> (Store, String) {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_city(&City {
                banana: "cambridgeMA".to_string(),
                name: "Cambridge".to_string(),
                state: "MA".to_string(),
                vendor: Vendor::Legistar,
                slug: "cambridge".to_string(),
                status: CityStatus::Active,
            })
            .unwrap();
        let deltas = store
            .upsert_meetings(
                "cambridgeMA",
                &[NormalizedMeeting {
                    vendor_meeting_id: "900".to_string(),
                    title: "City Council".to_string(),
                    start: Utc.with_ymd_and_hms(2025, 12, 1, 23, 0, 0).unwrap(),
                    source: MeetingSource::Agenda(
                        "https://webapi.legistar.com/v1/cambridge/events/900".to_string(),
                    ),
                }],
            )
            .unwrap();
        let id = deltas[0].meeting_id.clone();
        (store, id)
    }

    fn sample_items() -> Vec<AgendaItem> {
        vec![
            AgendaItem {
                vendor_item_id: "1".to_string(),
                title: "Zoning petition".to_string(),
                sequence: 1,
                matter_number: Some("O2025-0019668".to_string()),
                attachments: vec![AttachmentRef {
                    name: "Staff Report Leg Ver2".to_string(),
                    url: "https://legistar.example/att/2".to_string(),
                    metadata: serde_json::json!({"vendor": "legistar"}),
                }],
            },
            AgendaItem {
                vendor_item_id: "2".to_string(),
                title: "Public comment".to_string(),
                sequence: 2,
                matter_number: None,
                attachments: vec![],
            },
        ]
    }

    #[test]
    fn test_items_replace_atomically() {
        let (store, meeting) = store_with_meeting();
        store
            .upsert_items_and_attachments(&meeting, &sample_items())
            .unwrap();

        let items = store.get_items_with_attachments(&meeting).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0.sequence, 1);
        assert_eq!(items[0].1.len(), 1);
        assert_eq!(items[1].1.len(), 0);

        // Second pass with a shrunken item set fully replaces the first.
        store
            .upsert_items_and_attachments(&meeting, &sample_items()[..1])
            .unwrap();
        let items = store.get_items_with_attachments(&meeting).unwrap();
        assert_eq!(items.len(), 1);

        // Cascade removed the orphaned item's attachments.
        let orphans: i64 = store
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM attachments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 1);
    }

    #[test]
    fn test_item_summary_update() {
        let (store, meeting) = store_with_meeting();
        store
            .upsert_items_and_attachments(&meeting, &sample_items())
            .unwrap();
        let items = store.get_items_with_attachments(&meeting).unwrap();
        store
            .set_item_summary(&items[0].0.id, "Rezoning of Mass Ave corridor.")
            .unwrap();

        let items = store.get_items_with_attachments(&meeting).unwrap();
        assert_eq!(
            items[0].0.summary.as_deref(),
            Some("Rezoning of Mass Ave corridor.")
        );
    }
}
