use url::Url;

use review_core::model::{
    BufferEntry, Fingerprint, Material, MaterialId, Origin, Question, QuestionDraft, UserId,
};
use review_core::time::fixed_now;
use storage::repository::{
    BufferRepository, CachedImage, ImageCacheRepository, MaterialRepository, MirrorRepository,
    SolvedSetRepository,
};
use storage::sqlite::SqliteRepository;

fn user() -> UserId {
    UserId::new("user-1").unwrap()
}

fn build_question(text: &str, material: &str) -> Question {
    let origin = Origin::new(MaterialId::new(material).unwrap(), "Notes");
    QuestionDraft::multiple_choice(text, vec!["a".into(), "b".into(), "c".into()], 1)
        .validate(origin, fixed_now())
        .unwrap()
}

fn build_entry(text: &str, material: &str) -> BufferEntry {
    BufferEntry::new(build_question(text, material), None, fixed_now())
}

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn buffer_round_trips_and_dedupes() {
    let repo = connect("memdb_buffer").await;

    repo.append_entry(&user(), &build_entry("Q1", "mat-1"))
        .await
        .unwrap();
    repo.append_entry(&user(), &build_entry("Q2", "mat-1"))
        .await
        .unwrap();
    // Same trimmed text: primary key keeps the first row.
    repo.append_entry(&user(), &build_entry("  Q1  ", "mat-2"))
        .await
        .unwrap();

    let buffer = repo.load_buffer(&user()).await.unwrap();
    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer[0].question.text(), "Q1");
    assert_eq!(buffer[1].question.text(), "Q2");

    let removed = repo
        .remove_by_fingerprints(&user(), &[Fingerprint::of("Q1"), Fingerprint::of("ghost")])
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let buffer = repo.load_buffer(&user()).await.unwrap();
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer[0].question.text(), "Q2");
}

#[tokio::test]
async fn mark_ready_updates_entry_in_place() {
    let repo = connect("memdb_ready").await;

    repo.append_entry(&user(), &build_entry("Q1", "mat-1"))
        .await
        .unwrap();
    let url = Url::parse("https://img.example/q1.png").unwrap();
    repo.mark_ready(&user(), &Fingerprint::of("Q1"), &url)
        .await
        .unwrap();

    let buffer = repo.load_buffer(&user()).await.unwrap();
    assert!(buffer[0].ready);
    assert_eq!(buffer[0].image_url.as_ref(), Some(&url));
}

#[tokio::test]
async fn drain_leaves_buffer_empty() {
    let repo = connect("memdb_drain").await;

    repo.append_entry(&user(), &build_entry("Q1", "mat-1"))
        .await
        .unwrap();
    repo.append_entry(&user(), &build_entry("Q2", "mat-1"))
        .await
        .unwrap();

    let drained = repo.drain_buffer(&user()).await.unwrap();
    assert_eq!(drained.len(), 2);
    assert!(repo.load_buffer(&user()).await.unwrap().is_empty());
}

#[tokio::test]
async fn material_question_list_is_append_only_and_ordered() {
    let repo = connect("memdb_material").await;

    let material = Material::new(MaterialId::new("mat-1").unwrap(), "Notes", "en")
        .with_summary("the summary");
    repo.upsert_material(&user(), &material).await.unwrap();

    for text in ["Q1", "Q2", "Q3"] {
        repo.append_question(&material.id, &build_question(text, "mat-1"))
            .await
            .unwrap();
    }

    let fetched = repo.get_material(&material.id).await.unwrap().unwrap();
    assert_eq!(fetched.summary.as_deref(), Some("the summary"));
    let texts: Vec<_> = fetched.questions.iter().map(|q| q.text()).collect();
    assert_eq!(texts, vec!["Q1", "Q2", "Q3"]);

    let listed = repo.list_materials(&user()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].questions.len(), 3);
}

#[tokio::test]
async fn solved_set_is_idempotent_and_durable() {
    let repo = connect("memdb_solved").await;

    repo.add_solved(&user(), &Fingerprint::of("Q1")).await.unwrap();
    repo.add_solved(&user(), &Fingerprint::of("Q1")).await.unwrap();
    repo.add_solved(&user(), &Fingerprint::of("Q2")).await.unwrap();

    let solved = repo.load_solved(&user()).await.unwrap();
    assert_eq!(solved.len(), 2);
    assert!(solved.contains(&Fingerprint::of("Q1")));
}

#[tokio::test]
async fn mirror_replace_and_reload() {
    let repo = connect("memdb_mirror").await;

    let entries = vec![build_entry("Q1", "mat-1"), build_entry("Q2", "mat-1")];
    repo.replace_mirror(&user(), &entries).await.unwrap();

    let loaded = repo.load_mirror(&user()).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].question.text(), "Q1");

    // Replacing overwrites the previous mirror wholesale.
    repo.replace_mirror(&user(), &entries[..1]).await.unwrap();
    let loaded = repo.load_mirror(&user()).await.unwrap();
    assert_eq!(loaded.len(), 1);
}

#[tokio::test]
async fn image_cache_round_trips() {
    let repo = connect("memdb_images").await;

    let image = CachedImage {
        url: Url::parse("https://img.example/a.png").unwrap(),
        byte_len: 4096,
        created_at: fixed_now(),
    };
    repo.put_image("hash-a", &image).await.unwrap();
    assert_eq!(repo.get_image("hash-a").await.unwrap(), Some(image));

    repo.delete_image("hash-a").await.unwrap();
    assert_eq!(repo.get_image("hash-a").await.unwrap(), None);
}
