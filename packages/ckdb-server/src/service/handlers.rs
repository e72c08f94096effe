//! Verb handlers.
//!
//! Each handler validates its fields out of the transfer map, performs
//! the database write and memory update, and returns the raw reply
//! payload. The listener wraps the payload with the message id and the
//! receive timestamp. User-data problems never abort: they come back as
//! `failed.*` / `bad.*` payloads.

use sqlx::PgPool;
use tracing::{debug, error};

use ckdb_core::messages::methods;
use ckdb_core::{codec, patterns, Command, Request, Timestamp, FLDSEP};

use crate::entities::{
    auths, idcontrol, payments, poolstats, shareerrors, shares, users, workinfo, Store,
};
use crate::storage::Origin;

/// Everything a handler needs for one request.
pub struct HandlerContext<'a> {
    pub store: &'a Store,
    pub pool: &'a PgPool,
    /// Stamped when the listener received the message.
    pub now: Timestamp,
    pub origin: Origin,
}

/// Pull a required field or bail out with its failure payload.
macro_rules! require {
    ($transfer:expr, $name:expr, $len:expr, $patt:expr) => {
        match $transfer.require($name, $len, $patt) {
            Ok(value) => value,
            Err(err) => return err.to_string(),
        }
    };
}

/// Route a parsed request to its handler and return the reply payload.
pub async fn dispatch(req: &Request, ctx: &HandlerContext<'_>) -> String {
    match req.command {
        // Normally intercepted by the listener; answered here too so
        // dispatch is total.
        Command::Shutdown => "exiting".to_string(),
        Command::Ping => "pong".to_string(),
        Command::Sharelog => sharelog(req, ctx).await,
        Command::Authorise => authorise(req, ctx).await,
        Command::AddUser => adduser(req, ctx).await,
        Command::ChkPass => chkpass(req, ctx),
        Command::PoolStats => poolstats_cmd(req, ctx).await,
        Command::NewId => newid(req, ctx).await,
        Command::Payments => payments_cmd(req, ctx),
    }
}

async fn adduser(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let username = require!(t, "username", 3, Some(patterns::USER));
    let emailaddress = require!(t, "emailaddress", 7, Some(patterns::MAIL));
    let passwordhash = require!(t, "passwordhash", 64, Some(patterns::HEX));

    match users::add(
        ctx.pool,
        ctx.store,
        username,
        emailaddress,
        passwordhash,
        ctx.now,
        &ctx.origin,
    )
    .await
    {
        Ok(_) => {
            debug!("{}.added.{username}", req.id);
            format!("added.{username}")
        }
        Err(err) => {
            error!("adduser '{username}' failed: {err}");
            "failed.DBE".to_string()
        }
    }
}

fn chkpass(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let username = require!(t, "username", 3, Some(patterns::USER));
    let passwordhash = require!(t, "passwordhash", 64, Some(patterns::HEX));

    let matches = ctx
        .store
        .users
        .find(username)
        .is_some_and(|user| user.passwordhash.eq_ignore_ascii_case(passwordhash));

    if matches {
        debug!("{}.login.{username}", req.id);
        "ok".to_string()
    } else {
        "bad".to_string()
    }
}

async fn sharelog(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let method = require!(t, "method", 1, None);

    if method.eq_ignore_ascii_case(methods::WORKINFO) {
        sharelog_workinfo(req, ctx).await
    } else if method.eq_ignore_ascii_case(methods::SHARES) {
        sharelog_shares(req, ctx)
    } else if method.eq_ignore_ascii_case(methods::SHAREERRORS) {
        sharelog_shareerrors(req, ctx)
    } else {
        "bad.method".to_string()
    }
}

async fn sharelog_workinfo(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let workinfoid = require!(t, "workinfoid", 1, None);
    let poolinstance = require!(t, "poolinstance", 1, None);
    let transactiontree = require!(t, "transactiontree", 1, None);
    let merklehash = require!(t, "merklehash", 1, None);
    let prevhash = require!(t, "prevhash", 1, None);
    let coinbase1 = require!(t, "coinbase1", 1, None);
    let coinbase2 = require!(t, "coinbase2", 1, None);
    let version = require!(t, "version", 1, None);
    let bits = require!(t, "bits", 1, None);
    let ntime = require!(t, "ntime", 1, None);
    let reward = require!(t, "reward", 1, None);

    match workinfo::add(
        ctx.pool,
        ctx.store,
        t,
        workinfoid,
        poolinstance,
        transactiontree,
        merklehash,
        prevhash,
        coinbase1,
        coinbase2,
        version,
        bits,
        ntime,
        reward,
        ctx.now,
        &ctx.origin,
    )
    .await
    {
        Ok(id) => {
            debug!("added.workinfo.{id}");
            format!("added.{id}")
        }
        Err(err) => {
            error!("workinfo add failed: {err}");
            "bad.DBE".to_string()
        }
    }
}

fn sharelog_shares(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let workinfoid = require!(t, "workinfoid", 1, None);
    let username = require!(t, "username", 1, None);
    let workername = require!(t, "workername", 1, None);
    let clientid = require!(t, "clientid", 1, None);
    let enonce1 = require!(t, "enonce1", 1, None);
    let nonce2 = require!(t, "nonce2", 1, None);
    let nonce = require!(t, "nonce", 1, None);
    let diff = require!(t, "diff", 1, None);
    let sdiff = require!(t, "sdiff", 1, None);
    let secondaryuserid = require!(t, "secondaryuserid", 1, None);

    match shares::add(
        ctx.store,
        t,
        workinfoid,
        username,
        workername,
        clientid,
        enonce1,
        nonce2,
        nonce,
        diff,
        sdiff,
        secondaryuserid,
        ctx.now,
        &ctx.origin,
    ) {
        Ok(_) => {
            debug!("added.shares.{nonce}");
            format!("added.{nonce}")
        }
        Err(err) => {
            debug!("shares add dropped: {err}");
            "bad.DATA".to_string()
        }
    }
}

fn sharelog_shareerrors(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let workinfoid = require!(t, "workinfoid", 1, None);
    let username = require!(t, "username", 1, None);
    let workername = require!(t, "workername", 1, None);
    let clientid = require!(t, "clientid", 1, None);
    let errn = require!(t, "errno", 1, None);
    let error_text = require!(t, "error", 1, None);
    let secondaryuserid = require!(t, "secondaryuserid", 1, None);

    match shareerrors::add(
        ctx.store,
        t,
        workinfoid,
        username,
        workername,
        clientid,
        errn,
        error_text,
        secondaryuserid,
        ctx.now,
        &ctx.origin,
    ) {
        Ok(_) => {
            debug!("added.shareerror.{username}");
            format!("added.{username}")
        }
        Err(err) => {
            debug!("shareerrors add dropped: {err}");
            "bad.DATA".to_string()
        }
    }
}

async fn authorise(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let method = require!(t, "method", 1, None);
    if !method.eq_ignore_ascii_case(methods::AUTH) {
        return "bad.method".to_string();
    }

    let username = require!(t, "username", 1, None);
    let workername = require!(t, "workername", 1, None);
    let clientid = require!(t, "clientid", 1, None);
    let enonce1 = require!(t, "enonce1", 1, None);
    let useragent = require!(t, "useragent", 1, None);

    match auths::add(
        ctx.pool,
        ctx.store,
        t,
        username,
        workername,
        clientid,
        enonce1,
        useragent,
        ctx.now,
        &ctx.origin,
    )
    .await
    {
        Ok(secondaryuserid) => {
            debug!("added.authorise.{secondaryuserid}");
            format!("added.{secondaryuserid}")
        }
        Err(err) => {
            error!("authorise '{username}' failed: {err}");
            "bad.DBE".to_string()
        }
    }
}

/// The candidate report time: the pool stamps it either as an epoch
/// `sec[,usec]` pair or in the database text form.
fn parse_createdate(value: &str) -> Option<Timestamp> {
    Timestamp::parse_epoch_pair(value).or_else(|| Timestamp::parse_text(value).ok())
}

async fn poolstats_cmd(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let poolinstance = require!(t, "poolinstance", 1, None);
    let users_n = require!(t, "users", 1, None);
    let workers_n = require!(t, "workers", 1, None);
    let hashrate = require!(t, "hashrate", 1, None);
    let hashrate5m = require!(t, "hashrate5m", 1, None);
    let hashrate1hr = require!(t, "hashrate1hr", 1, None);
    let hashrate24hr = require!(t, "hashrate24hr", 1, None);

    let store_db = match poolstats::last_for_instance(ctx.store, poolinstance) {
        None => true,
        Some(previous) => {
            let createdate = require!(t, "createdate", 1, None);
            let Some(candidate) = parse_createdate(createdate) else {
                return "failed.invalid createdate".to_string();
            };
            candidate.diff_secs(previous.dates.createdate) > poolstats::STATS_PER
        }
    };

    match poolstats::add(
        ctx.pool,
        ctx.store,
        store_db,
        t,
        poolinstance,
        users_n,
        workers_n,
        hashrate,
        hashrate5m,
        hashrate1hr,
        hashrate24hr,
        ctx.now,
        &ctx.origin,
    )
    .await
    {
        Ok(_) => {
            debug!("{}.added.ok", req.id);
            "added.ok".to_string()
        }
        Err(err) => {
            error!("poolstats add failed: {err}");
            "bad.DBE".to_string()
        }
    }
}

async fn newid(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let idname = require!(t, "idname", 3, Some(patterns::ID));
    let idvalue = require!(t, "idvalue", 1, Some(patterns::INT));

    match idcontrol::add(ctx.pool, idname, idvalue, ctx.now, &ctx.origin).await {
        Ok(()) => {
            debug!("{}.added.{idname}", req.id);
            format!("added.{idname}")
        }
        Err(err) => {
            error!("newid '{idname}' failed: {err}");
            "failed.DBE".to_string()
        }
    }
}

fn payments_cmd(req: &Request, ctx: &HandlerContext<'_>) -> String {
    let t = &req.transfer;
    let username = require!(t, "username", 3, Some(patterns::USER));

    let Some(user) = ctx.store.users.find(username) else {
        return "bad".to_string();
    };

    let sep = FLDSEP as char;
    let rows = payments::for_user(ctx.store, user.userid);
    let mut reply = String::from("ok.");
    for (i, payment) in rows.iter().enumerate() {
        reply.push_str(&format!("paydate{i}={}{sep}", payment.paydate.to_text()));
        reply.push_str(&format!("payaddress{i}={}{sep}", payment.payaddress));
        reply.push_str(&format!(
            "amount{i}={}{sep}",
            codec::i64_to_text(payment.amount)
        ));
    }
    reply.push_str(&format!("rows={}", rows.len()));

    debug!("{}.payments.{username}", req.id);
    reply
}

#[cfg(test)]
mod tests {
    use ckdb_core::breakdown;

    use crate::entities::payments::tests::seed_payment;
    use crate::entities::poolstats::tests::seed_poolstat;
    use crate::entities::users::tests::seed_user;
    use crate::entities::workers::tests::seed_worker;
    use crate::entities::workinfo::tests::seed_workinfo;

    use super::*;

    const SEP: char = FLDSEP as char;

    /// A pool that fails fast if any handler actually touches the
    /// database: nothing listens on port 1.
    fn dead_pool() -> PgPool {
        PgPool::connect_lazy("postgres://postgres@127.0.0.1:1/ckdb").unwrap()
    }

    fn ctx<'a>(store: &'a Store, pool: &'a PgPool) -> HandlerContext<'a> {
        HandlerContext {
            store,
            pool,
            now: Timestamp {
                sec: 1_400_100_000,
                usec: 0,
            },
            origin: Origin::new("ckdb", "listener", "127.0.0.1"),
        }
    }

    async fn run(store: &Store, message: &str) -> String {
        let pool = dead_pool();
        let req = breakdown(message).unwrap();
        dispatch(&req, &ctx(store, &pool)).await
    }

    fn good_hash() -> String {
        "a".repeat(64)
    }

    #[tokio::test]
    async fn adduser_validates_fields() {
        let store = Store::new();
        assert_eq!(
            run(&store, "1.adduser.emailaddress=a@b.co").await,
            "failed.missing username"
        );
        assert_eq!(
            run(&store, &format!("1.adduser.username=al{SEP}emailaddress=a@bb.com{SEP}passwordhash={}", good_hash())).await,
            "failed.short username"
        );
        assert_eq!(
            run(
                &store,
                &format!(
                    "1.adduser.username=alice{SEP}emailaddress=notanemail{SEP}passwordhash={}",
                    good_hash()
                )
            )
            .await,
            "failed.invalid emailaddress"
        );
        assert_eq!(
            run(
                &store,
                &format!("1.adduser.username=alice{SEP}emailaddress=a@bb.com{SEP}passwordhash=zz")
            )
            .await,
            "failed.short passwordhash"
        );
    }

    #[tokio::test]
    async fn adduser_with_valid_fields_reaches_the_database() {
        let store = Store::new();
        let reply = run(
            &store,
            &format!(
                "1.adduser.username=alice{SEP}emailaddress=alice@example.com{SEP}passwordhash={}",
                good_hash()
            ),
        )
        .await;
        // Validation passed; the dead pool turns the id allocation into
        // the database-error reply.
        assert_eq!(reply, "failed.DBE");
        assert!(store.users.is_empty());
    }

    #[tokio::test]
    async fn chkpass_matches_case_insensitively() {
        let store = Store::new();
        seed_user(&store, 667, "alice", &good_hash().to_uppercase());

        let ok = format!(
            "2.chkpass.username=alice{SEP}passwordhash={}",
            good_hash()
        );
        assert_eq!(run(&store, &ok).await, "ok");

        let bad = format!("2.chkpass.username=alice{SEP}passwordhash={}", "b".repeat(64));
        assert_eq!(run(&store, &bad).await, "bad");

        let unknown = format!("2.chkpass.username=bob{SEP}passwordhash={}", good_hash());
        assert_eq!(run(&store, &unknown).await, "bad");
    }

    #[tokio::test]
    async fn sharelog_requires_method() {
        let store = Store::new();
        assert_eq!(
            run(&store, "3.sharelog.workinfoid=1").await,
            "failed.missing method"
        );
        assert_eq!(
            run(&store, &format!("3.sharelog.method=unknown{SEP}x=1")).await,
            "bad.method"
        );
    }

    fn share_message(workinfoid: &str) -> String {
        [
            "4.sharelog.method=shares".to_string(),
            format!("workinfoid={workinfoid}"),
            "username=alice".to_string(),
            "workername=alice.rig1".to_string(),
            "clientid=42".to_string(),
            "enonce1=deadbeef".to_string(),
            "nonce2=aabbccdd".to_string(),
            "nonce=1a2b3c4d".to_string(),
            "diff=1.0".to_string(),
            "sdiff=1.5".to_string(),
            "secondaryuserid=abcdef0123456789".to_string(),
        ]
        .join(&SEP.to_string())
    }

    #[tokio::test]
    async fn share_requires_existing_workinfo() {
        let store = Store::new();
        seed_user(&store, 667, "alice", &good_hash());
        seed_worker(&store, 3, 667, "alice.rig1");

        assert_eq!(run(&store, &share_message("9999")).await, "bad.DATA");
        assert!(store.shares.is_empty());

        seed_workinfo(&store, 9999);
        assert_eq!(run(&store, &share_message("9999")).await, "added.1a2b3c4d");
        assert_eq!(store.shares.len(), 1);
    }

    #[tokio::test]
    async fn shareerror_round_trip() {
        let store = Store::new();
        seed_user(&store, 667, "alice", &good_hash());
        seed_worker(&store, 3, 667, "alice.rig1");
        seed_workinfo(&store, 7777);

        let msg = [
            "5.sharelog.method=shareerror".to_string(),
            "workinfoid=7777".to_string(),
            "username=alice".to_string(),
            "workername=alice.rig1".to_string(),
            "clientid=42".to_string(),
            "errno=21".to_string(),
            "error=SHARE_STALE".to_string(),
            "secondaryuserid=abcdef0123456789".to_string(),
        ]
        .join(&SEP.to_string());
        assert_eq!(run(&store, &msg).await, "added.alice");
        assert_eq!(store.shareerrors.len(), 1);
    }

    #[tokio::test]
    async fn authorise_needs_the_right_method() {
        let store = Store::new();
        let msg = format!("6.authorise.method=wrong{SEP}username=alice");
        assert_eq!(run(&store, &msg).await, "bad.method");
    }

    #[tokio::test]
    async fn authorise_unknown_user_is_dbe() {
        let store = Store::new();
        let msg = [
            "6.authorise.method=authorise".to_string(),
            "username=ghost".to_string(),
            "workername=ghost.rig".to_string(),
            "clientid=1".to_string(),
            "enonce1=00".to_string(),
            "useragent=cgminer/4.0".to_string(),
        ]
        .join(&SEP.to_string());
        assert_eq!(run(&store, &msg).await, "bad.DBE");
    }

    fn poolstats_message(createdate: Option<&str>) -> String {
        let mut fields = vec![
            "7.poolstats.poolinstance=main".to_string(),
            "users=10".to_string(),
            "workers=25".to_string(),
            "hashrate=1000000".to_string(),
            "hashrate5m=1100000".to_string(),
            "hashrate1hr=1200000".to_string(),
            "hashrate24hr=1300000".to_string(),
        ];
        if let Some(cd) = createdate {
            fields.push(format!("createdate={cd}"));
        }
        fields.join(&SEP.to_string())
    }

    #[tokio::test]
    async fn poolstats_first_report_stores_to_db() {
        let store = Store::new();
        // No previous report: the handler decides to persist, and the
        // dead pool turns that decision into the database-error reply.
        assert_eq!(run(&store, &poolstats_message(None)).await, "bad.DBE");
        assert!(store.poolstats.is_empty());
    }

    #[tokio::test]
    async fn poolstats_within_window_is_memory_only() {
        let store = Store::new();
        seed_poolstat(&store, "main", 1_400_000_000);

        // Sixty seconds after the stored report: inside the window, no
        // database touch, memory updated.
        let reply = run(&store, &poolstats_message(Some("1400000060,0"))).await;
        assert_eq!(reply, "added.ok");
        assert_eq!(store.poolstats.len(), 2);

        // The fresh report is now the instance's newest row, carrying
        // the pool-stamped createdate.
        let last = poolstats::last_for_instance(&store, "main").unwrap();
        assert_eq!(last.dates.createdate.sec, 1_400_000_060);
    }

    #[tokio::test]
    async fn poolstats_beyond_window_stores_again() {
        let store = Store::new();
        seed_poolstat(&store, "main", 1_400_000_000);

        // Six hundred seconds later: beyond STATS_PER, so the handler
        // goes to the database again.
        let reply = run(&store, &poolstats_message(Some("1400000600,0"))).await;
        assert_eq!(reply, "bad.DBE");
    }

    #[tokio::test]
    async fn poolstats_requires_createdate_once_history_exists() {
        let store = Store::new();
        seed_poolstat(&store, "main", 1_400_000_000);
        assert_eq!(
            run(&store, &poolstats_message(None)).await,
            "failed.missing createdate"
        );
    }

    #[tokio::test]
    async fn newid_validates_and_maps_errors() {
        let store = Store::new();
        assert_eq!(
            run(&store, &format!("8.newid.idname=x{SEP}idvalue=1")).await,
            "failed.short idname"
        );
        assert_eq!(
            run(&store, &format!("8.newid.idname=blockid{SEP}idvalue=abc")).await,
            "failed.invalid idvalue"
        );
        assert_eq!(
            run(&store, &format!("8.newid.idname=blockid{SEP}idvalue=1000")).await,
            "failed.DBE"
        );
    }

    #[tokio::test]
    async fn payments_lists_rows_in_paydate_order() {
        let store = Store::new();
        seed_user(&store, 667, "alice", &good_hash());
        seed_payment(&store, 2, 667, 2_000, 50);
        seed_payment(&store, 1, 667, 1_000, 25);
        seed_payment(&store, 3, 667, 3_000, 75);

        let reply = run(&store, "9.payments.username=alice").await;
        assert!(reply.starts_with("ok."));
        assert!(reply.ends_with("rows=3"));

        let fields: Vec<&str> = reply[3..].split(SEP).collect();
        assert_eq!(fields.len(), 10);
        assert!(fields[0].starts_with("paydate0="));
        assert!(fields[1].starts_with("payaddress0="));
        assert_eq!(fields[2], "amount0=25");
        assert_eq!(fields[5], "amount1=50");
        assert_eq!(fields[8], "amount2=75");
    }

    #[tokio::test]
    async fn payments_unknown_user_is_bad() {
        let store = Store::new();
        assert_eq!(run(&store, "9.payments.username=ghost").await, "bad");
    }

    #[tokio::test]
    async fn payments_no_rows_still_ok() {
        let store = Store::new();
        seed_user(&store, 667, "alice", &good_hash());
        assert_eq!(run(&store, "9.payments.username=alice").await, "ok.rows=0");
    }

    #[tokio::test]
    async fn dispatch_is_total_over_intercepted_verbs() {
        let store = Store::new();
        assert_eq!(run(&store, "0.ping").await, "pong");
        assert_eq!(run(&store, "0.shutdown").await, "exiting");
    }
}
