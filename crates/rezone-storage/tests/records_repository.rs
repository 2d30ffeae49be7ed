use chrono::NaiveDate;
use rezone_core::{
    BuildingType, Location, MinutesUrl, PartialRecord, Record, RecordDates, RecordType, ReportUrl,
    Stats, Zoning, ZoningStatus,
};
use rezone_storage::{RecordsFilter, RecordsRepository, StoreError, Tier, TypeFilter};
use tempfile::{tempdir, TempDir};

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
}

fn later_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 2, 20).unwrap()
}

fn test_tier() -> (TempDir, RecordsRepository) {
    let dir = tempdir().expect("tempdir");
    let repo = RecordsRepository::new(dir.path(), Tier::Test).with_today(first_day);
    (dir, repo)
}

fn entry(record_type: RecordType, city: &str, address: &str) -> PartialRecord {
    PartialRecord {
        record_type: Some(record_type),
        city: Some(city.into()),
        metro_city: Some("metroCity".into()),
        address: Some(address.into()),
        raw_summaries: Some(vec![]),
        status: Some(ZoningStatus::Applied),
        ..Default::default()
    }
}

async fn all(repo: &RecordsRepository) -> Vec<Record> {
    repo.get_records(TypeFilter::All, &RecordsFilter::default())
        .await
        .expect("get_records")
        .data
}

#[tokio::test]
async fn upsert_into_empty_scope_stores_the_input_verbatim() {
    let (_dir, repo) = test_tier();

    let input = PartialRecord {
        record_type: Some(RecordType::Rezoning),
        city: Some("Richmond".into()),
        metro_city: Some("Metro Vancouver".into()),
        address: Some("123 Fake Street".into()),
        status: Some(ZoningStatus::Applied),
        application_id: Some("applicationId".into()),
        applicant: Some("applicant".into()),
        behalf: Some("behalf".into()),
        description: Some("description".into()),
        raw_summaries: Some(vec![]),
        building_type: Some(BuildingType::MultiFamilyResidential),
        dates: Some(RecordDates {
            applied_date: Some("2020-01-01".into()),
            ..Default::default()
        }),
        stats: Some(Stats {
            buildings: Some(1.0),
            stratas: Some(2.0),
            rentals: Some(3.0),
            hotels: Some(4.0),
            fsr: Some(5.0),
            height: None,
            storeys: Some(6.0),
        }),
        zoning: Some(Zoning {
            previous_zoning_code: Some("previousZoningCode".into()),
            previous_zoning_description: Some("previousZoningDescription".into()),
            new_zoning_code: Some("newZoningCode".into()),
            new_zoning_description: Some("newZoningDescription".into()),
        }),
        report_urls: Some(vec![ReportUrl {
            url: "url".into(),
            title: "title".into(),
            date: "2020-01-01".into(),
            status: ZoningStatus::Applied,
        }]),
        minutes_urls: Some(vec![MinutesUrl {
            url: "url".into(),
            date: "2020-01-01".into(),
            status: ZoningStatus::Applied,
        }]),
        location: Some(Location {
            latitude: 1.0,
            longitude: 2.0,
        }),
        ..Default::default()
    };
    let expected = Record::new(input.clone(), first_day()).expect("valid");

    let report = repo
        .upsert_records(RecordType::Rezoning, vec![input])
        .await
        .expect("upsert");
    assert_eq!(report.created.len(), 1);

    let stored = all(&repo).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(
        Record {
            id: expected.id,
            ..stored[0].clone()
        },
        expected
    );
}

#[tokio::test]
async fn same_application_id_merges_and_takes_newer_description() {
    let (_dir, repo) = test_tier();

    let mut first = entry(RecordType::Rezoning, "city", "address");
    first.application_id = Some("applicationId".into());
    first.description = Some("description 1".into());
    let mut second = first.clone();
    second.description = Some("description 2".into());

    repo.upsert_records(RecordType::Rezoning, vec![first])
        .await
        .expect("first");
    repo.upsert_records(RecordType::Rezoning, vec![second])
        .await
        .expect("second");

    let stored = all(&repo).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].description, "description 2");
}

#[tokio::test]
async fn application_id_takes_precedence_over_differing_address() {
    let (_dir, repo) = test_tier();

    let mut first = entry(RecordType::Rezoning, "city", "address 1");
    first.application_id = Some("applicationId".into());
    let mut second = entry(RecordType::Rezoning, "city", "address 2");
    second.application_id = Some("applicationId".into());

    let created = repo
        .upsert_records(RecordType::Rezoning, vec![first])
        .await
        .expect("first")
        .created;
    repo.upsert_records(RecordType::Rezoning, vec![second])
        .await
        .expect("second");

    let stored = all(&repo).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, created[0]);
    assert_eq!(stored[0].application_id.as_deref(), Some("applicationId"));
    assert_eq!(stored[0].address, "address 2");
}

#[tokio::test]
async fn matching_address_merges_into_the_right_record() {
    let (_dir, repo) = test_tier();

    let a = repo
        .upsert_records(
            RecordType::Rezoning,
            vec![entry(RecordType::Rezoning, "city", "address 1")],
        )
        .await
        .expect("a")
        .created[0];
    assert_eq!(all(&repo).await.len(), 1);

    repo.upsert_records(
        RecordType::Rezoning,
        vec![entry(RecordType::Rezoning, "city", "address 2")],
    )
    .await
    .expect("b");
    assert_eq!(all(&repo).await.len(), 2);

    let mut c = entry(RecordType::Rezoning, "city", "address 1");
    c.description = Some("Merged description".into());
    repo.upsert_records(RecordType::Rezoning, vec![c])
        .await
        .expect("c");

    let stored = all(&repo).await;
    assert_eq!(stored.len(), 2);
    let merged = stored.iter().find(|r| r.id == a).expect("record A survives");
    assert_eq!(merged.description, "Merged description");
}

#[tokio::test]
async fn repeated_upsert_is_idempotent_and_advances_update_date() {
    let dir = tempdir().expect("tempdir");
    let early = RecordsRepository::new(dir.path(), Tier::Test).with_today(first_day);
    let late = RecordsRepository::new(dir.path(), Tier::Test).with_today(later_day);

    let mut observation = entry(RecordType::DevelopmentPermit, "Surrey", "7 Fraser Hwy");
    observation.application_id = Some("7924-0101-00".into());
    observation.description = Some("Four storey rental".into());

    early
        .upsert_records(RecordType::DevelopmentPermit, vec![observation.clone()])
        .await
        .expect("first");
    let before = all(&early).await.remove(0);

    late.upsert_records(RecordType::DevelopmentPermit, vec![observation])
        .await
        .expect("second");
    let stored = all(&late).await;
    assert_eq!(stored.len(), 1);
    let after = stored[0].clone();

    assert_eq!(after.update_date, later_day());
    assert_eq!(after.create_date, before.create_date);
    assert_eq!(
        Record {
            update_date: before.update_date,
            ..after
        },
        before
    );
}

#[tokio::test]
async fn replace_for_city_touches_only_that_scope() {
    let (_dir, repo) = test_tier();

    let make = |record_type, city, address| {
        Record::new(entry(record_type, city, address), first_day()).expect("valid")
    };
    let non_city_rezoning = make(RecordType::Rezoning, "not-city", "address 1");
    let non_city_permit = make(RecordType::DevelopmentPermit, "not-city", "address 2");
    let city_rezoning = make(RecordType::Rezoning, "city", "address 3");
    let city_permit = make(RecordType::DevelopmentPermit, "city", "address 4");

    for record in [
        &non_city_rezoning,
        &non_city_permit,
        &city_rezoning,
        &city_permit,
    ] {
        repo.create_record(record.clone()).await.expect("create");
    }
    assert_eq!(all(&repo).await.len(), 4);

    let removed = repo
        .dangerously_replace_records_for_city(RecordType::Rezoning, "city", vec![])
        .await
        .expect("replace");
    assert_eq!(removed, 1);

    let ids = all(&repo).await.into_iter().map(|r| r.id).collect::<Vec<_>>();
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&non_city_rezoning.id));
    assert!(ids.contains(&non_city_permit.id));
    assert!(!ids.contains(&city_rezoning.id));
    assert!(ids.contains(&city_permit.id));
}

#[tokio::test]
async fn delete_removes_exactly_one_record() {
    let (_dir, repo) = test_tier();

    let first = Record::new(entry(RecordType::Rezoning, "city", "address 1"), first_day())
        .expect("valid");
    let second = Record::new(entry(RecordType::Rezoning, "city", "address 2"), first_day())
        .expect("valid");
    repo.create_record(first.clone()).await.expect("create");
    repo.create_record(second.clone()).await.expect("create");
    assert_eq!(all(&repo).await.len(), 2);

    let removed = repo.delete_record(first.id).await.expect("delete");
    assert_eq!(removed.id, first.id);

    let stored = all(&repo).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, second.id);

    let err = repo.delete_record(first.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { tier: Tier::Test, .. }));
    assert_eq!(all(&repo).await.len(), 1);
}

#[tokio::test]
async fn get_records_filters_type_then_city_then_id() {
    let (_dir, repo) = test_tier();
    let rezoning = Record::new(entry(RecordType::Rezoning, "Burnaby", "1 A St"), first_day())
        .expect("valid");
    let permit = Record::new(
        entry(RecordType::DevelopmentPermit, "Burnaby", "2 B St"),
        first_day(),
    )
    .expect("valid");
    repo.dangerously_replace_all_records(vec![rezoning.clone(), permit.clone()])
        .await
        .expect("seed");

    let page = repo
        .get_records(
            TypeFilter::Only(RecordType::Rezoning),
            &RecordsFilter::city("Burnaby"),
        )
        .await
        .expect("by city");
    assert_eq!(page.total, 1);
    assert_eq!(page.data[0].id, rezoning.id);

    let page = repo
        .get_records(
            TypeFilter::Only(RecordType::Rezoning),
            &RecordsFilter::id(permit.id),
        )
        .await
        .expect("by id");
    assert_eq!(page.total, 0);

    let page = repo
        .get_records(TypeFilter::All, &RecordsFilter::id(permit.id))
        .await
        .expect("by id");
    assert_eq!(page.data, vec![permit]);
}
