use clap::Parser;
use async_graphql_warp::{graphql_protocol, graphql_subscription_upgrade_with_data};
use warp::Filter;

use sfu_core::cmdline::{Opts, Run, SubCommand};
use sfu_core::config::Config;
use sfu_core::rpc::schema::{self, ApiSchema};
use sfu_core::sfu::Sfu;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    match opts.subcmd {
        SubCommand::Schema => {
            let sfu = Sfu::new(Config::from_env()).await?;
            println!("{}", schema::schema(sfu).sdl());
        }
        SubCommand::Run(run) => {
            run_server(run).await?;
        }
    }
    Ok(())
}

async fn run_server(run: Run) -> anyhow::Result<()> {
    let config = Config::from_env();
    let sfu = Sfu::new(config).await?;
    let schema: ApiSchema = schema::schema(sfu);

    let graphql_post = async_graphql_warp::graphql(schema).and_then(
        |(schema, request): (ApiSchema, async_graphql::Request)| async move {
            Ok::<_, std::convert::Infallible>(async_graphql_warp::GraphQLResponse::from(
                schema.execute(request).await,
            ))
        },
    );

    let subscription_schema = schema.clone();
    let graphql_ws = warp::path("graphql")
        .and(warp::ws())
        .and(graphql_protocol())
        .map(move |ws: warp::ws::Ws, protocol| {
            let schema = subscription_schema.clone();
            let reply = ws.on_upgrade(move |websocket| async move {
                graphql_subscription_upgrade_with_data(websocket, protocol, schema, |_| async move {
                    Ok(async_graphql::Data::default())
                })
                .await;
            });
            warp::reply::with_header(
                reply,
                "Sec-WebSocket-Protocol",
                protocol.sec_websocket_protocol(),
            )
        });

    let routes = warp::path("graphql").and(graphql_post).or(graphql_ws);

    log::info!("listening on {}", run.listen_addr);
    let addr: std::net::SocketAddr = run.listen_addr.parse()?;
    warp::serve(routes.with(warp::log("sfu-core")))
        .tls()
        .cert_path(&run.cert_path)
        .key_path(&run.key_path)
        .run(addr)
        .await;
    Ok(())
}
