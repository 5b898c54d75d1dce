use std::sync::Arc;

use admissions::admissions::{
    validate_format, ActorId, AdmissionRecord, AdmissionWorkflowEngine, ApplicantDetails,
    CodeKind, ContactInfo, FixedClock, GuardianInfo, InMemoryBackend, NewInquiry,
    PreviousSchooling, ProvisionedIdentity, RequestContext, SequentialCode,
};
use admissions::config::{validate_prefix, AdmissionsConfig};
use chrono::{Local, NaiveDate};
use clap::{Args, Subcommand};

use crate::error::AppError;
use crate::infra::{in_memory_engine, parse_date};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Date the whole walkthrough happens on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) date: Option<NaiveDate>,
    /// School prefix for temporary ids and student codes.
    #[arg(long, default_value = "SCH")]
    pub(crate) prefix: String,
    /// Applicant first name.
    #[arg(long, default_value = "Aarav")]
    pub(crate) first_name: String,
    /// Applicant last name.
    #[arg(long, default_value = "Shah")]
    pub(crate) last_name: String,
    /// Class the applicant is applying for.
    #[arg(long, default_value = "5")]
    pub(crate) class: String,
    /// Print temporary passwords instead of masking them.
    #[arg(long)]
    pub(crate) show_passwords: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CodesCommand {
    /// Check a code against the `PREFIX-YYYY-NNNN` / `PREFIX-INQ-YYYY-NNNN` shape
    Validate { code: String },
    /// Split a code into prefix, kind, year and sequence
    Parse { code: String },
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let date = args.date.unwrap_or_else(|| Local::now().date_naive());
    let config = AdmissionsConfig {
        school_prefix: validate_prefix(&args.prefix)?,
        ..AdmissionsConfig::default()
    };
    let (engine, backend) = in_memory_engine(&config, Arc::new(FixedClock::on(date)));
    let ctx = RequestContext::new(ActorId("demo-registrar".to_string()));

    println!("Admission workflow demo ({date})");

    let inquiry = engine
        .create_inquiry(&ctx, demo_inquiry(&args))
        .await?;
    print_step("Inquiry recorded", &inquiry);

    let applied = engine
        .convert_to_application(&ctx, inquiry.admission_id, PreviousSchooling::default())
        .await?;
    print_step("Application accepted", &applied);

    match engine
        .convert_to_application(&ctx, inquiry.admission_id, PreviousSchooling::default())
        .await
    {
        Ok(_) => println!("  Unexpected: second conversion succeeded"),
        Err(err) => println!("  Repeat conversion refused: {err}"),
    }

    let admitted = engine.admit(&ctx, inquiry.admission_id).await?;
    print_step("Admitted", &admitted);
    if let Some(url) = &admitted.admission_offer_letter_url {
        println!("  Offer letter: {url}");
    }

    let outcome = engine.enroll(&ctx, inquiry.admission_id).await?;
    print_step("Enrolled", &outcome.admission);
    println!("  Student code: {}", outcome.student.student_code);
    print_identity(&outcome.credentials.student, args.show_passwords);
    if let Some(parent) = &outcome.credentials.parent {
        print_identity(parent, args.show_passwords);
    }

    match engine.enroll(&ctx, inquiry.admission_id).await {
        Ok(_) => println!("  Unexpected: second enrollment succeeded"),
        Err(err) => println!("  Repeat enrollment refused: {err}"),
    }

    print_summary(&engine, &backend, date).await?;
    Ok(())
}

pub(crate) fn run_codes(command: CodesCommand) -> Result<(), AppError> {
    match command {
        CodesCommand::Validate { code } => {
            let verdict = if validate_format(&code) { "valid" } else { "invalid" };
            println!("{code}: {verdict}");
            Ok(())
        }
        CodesCommand::Parse { code } => {
            let parsed = SequentialCode::parse(&code)
                .map_err(|err| AppError::BadRequest(format!("{code}: {err}")))?;
            let kind = match parsed.kind() {
                CodeKind::Inquiry => "temporary id",
                CodeKind::Student => "student code",
            };
            println!("code:     {parsed}");
            println!("kind:     {kind}");
            println!("prefix:   {}", parsed.prefix());
            println!("year:     {}", parsed.year());
            println!("sequence: {}", parsed.sequence());
            if parsed.kind() == CodeKind::Student {
                println!("username: {}", parsed.username());
            }
            Ok(())
        }
    }
}

fn demo_inquiry(args: &DemoArgs) -> NewInquiry {
    NewInquiry {
        applicant: ApplicantDetails {
            first_name: args.first_name.clone(),
            last_name: args.last_name.clone(),
            date_of_birth: None,
            gender: None,
            applying_for_class: args.class.clone(),
            contact: ContactInfo::default(),
            address: None,
        },
        guardian: GuardianInfo {
            name: format!("Guardian of {}", args.first_name),
            relation: Some("parent".to_string()),
            contact: ContactInfo {
                phone: Some("+91 90000 00000".to_string()),
                email: None,
            },
        },
    }
}

fn print_step(label: &str, record: &AdmissionRecord) {
    println!(
        "{label}: {} [{}] status={}",
        record.applicant.full_name(),
        record.temporary_id,
        record.status()
    );
}

fn print_identity(identity: &ProvisionedIdentity, show_password: bool) {
    let password = match identity.temporary_password() {
        Some(password) if show_password => password.to_string(),
        Some(_) => "********".to_string(),
        None => "(existing account)".to_string(),
    };
    println!(
        "  {} login: {} / {}",
        identity.role().label(),
        identity.username(),
        password
    );
}

async fn print_summary(
    engine: &AdmissionWorkflowEngine,
    backend: &InMemoryBackend,
    date: NaiveDate,
) -> Result<(), AppError> {
    use chrono::Datelike;

    println!("\nSummary");
    println!(
        "  Student codes issued in {}: {} (next preview {})",
        date.year(),
        engine.count_issued(date.year()).await?,
        engine.peek_next(date.year()).await?
    );
    println!("  Identities: {}", backend.identities.usernames().await.join(", "));
    let notifications = backend.notifications.events();
    println!("  Notifications queued: {}", notifications.len());
    for notification in notifications {
        println!(
            "    {:?} -> {}",
            notification.template, notification.destination
        );
    }
    Ok(())
}
