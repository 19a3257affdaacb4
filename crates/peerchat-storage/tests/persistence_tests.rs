//! Cross-repository persistence tests against an on-disk database,
//! including close/reopen cycles.

use chrono::Utc;
use tempfile::TempDir;

use peerchat_storage::{
    Database, DisplayNameRepository, GroupMemberRepository, KeyRepository, MessageRepository,
    RelationshipRepository,
};
use peerchat_types::{EntityType, FriendStatus, GroupKey, Relationship, StoredMessage};

fn open(dir: &TempDir) -> Database {
    Database::open(&dir.path().join("chat.db")).unwrap()
}

#[test]
fn rows_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let db = open(&dir);
        MessageRepository::new(db.clone())
            .store(&StoredMessage {
                id: 0,
                sender_peer_id: "me".into(),
                recipient_peer_id: "them".into(),
                send_time: Utc::now(),
                ciphertext: vec![1, 2, 3],
                is_outgoing: true,
            })
            .unwrap();
        RelationshipRepository::new(db.clone())
            .store(&Relationship {
                peer_id: "them".into(),
                status: FriendStatus::Approved,
                requested_at: Some(Utc::now()),
                approved_at: Some(Utc::now()),
            })
            .unwrap();
        KeyRepository::new(db)
            .store(&GroupKey {
                group_id: "g1".into(),
                key: vec![7u8; 32],
                name: "team".into(),
                created_at: Utc::now(),
            })
            .unwrap();
    }

    let db = open(&dir);
    assert_eq!(
        MessageRepository::new(db.clone())
            .messages_with_peer("them", 10)
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        RelationshipRepository::new(db.clone())
            .get_by_peer_id("them")
            .unwrap()
            .status,
        FriendStatus::Approved
    );
    assert_eq!(KeyRepository::new(db).get("g1").unwrap().key, vec![7u8; 32]);
}

#[test]
fn approved_rows_satisfy_the_timestamp_invariant() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);
    let repo = RelationshipRepository::new(db);

    let requested = Utc::now();
    repo.store(&Relationship {
        peer_id: "friend".into(),
        status: FriendStatus::Pending,
        requested_at: Some(requested),
        approved_at: None,
    })
    .unwrap();
    repo.update_status("friend", FriendStatus::Approved, Some(Utc::now()))
        .unwrap();

    for row in repo.approved().unwrap() {
        let approved_at = row.approved_at.expect("approved rows carry approved_at");
        assert!(approved_at >= row.requested_at.unwrap());
    }
}

#[test]
fn group_membership_and_names_compose() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir);

    let members = GroupMemberRepository::new(db.clone());
    let keys = KeyRepository::new(db.clone());
    let names = DisplayNameRepository::new(db);

    keys.store(&GroupKey {
        group_id: "g1".into(),
        key: vec![0u8; 32],
        name: "wire name".into(),
        created_at: Utc::now(),
    })
    .unwrap();
    members.add_members("g1", &["a".into(), "b".into()]).unwrap();
    names.store("g1", EntityType::Group, "my custom label").unwrap();

    assert_eq!(members.members_of("g1").unwrap().len(), 2);
    assert_eq!(keys.group_name("g1").unwrap().as_deref(), Some("wire name"));
    assert_eq!(
        names.get_by_entity("g1", EntityType::Group).unwrap().display_name,
        "my custom label"
    );
}
