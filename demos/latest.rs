use pvforecast::api::forecast::PvForecast;
use pvforecast::api::EntitySelector;
use pvforecast::PvForecastApi;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let api = PvForecastApi::from_default_sources(None, None)?;
    let pvf = PvForecast::new(&api);

    println!("Latest national forecast:");
    let national = pvf.latest(&EntitySelector::national(), &[])?;
    for r in national.records.iter().take(5) {
        println!(
            "{} / {} / {} / {:.3}",
            r.entity_id, r.forecast_base, r.datetime, r.generation_mw
        );
    }

    println!("Latest forecast for PES 23:");
    println!("{}", pvf.latest(&EntitySelector::pes(23), &[])?.as_polars_df()?);

    println!("Latest forecast for GSP 120 with installed capacity:");
    let extras = vec!["installedcapacity_mwp".to_string()];
    println!(
        "{}",
        pvf.latest(&EntitySelector::gsp(120), &extras)?.as_polars_df()?
    );
    Ok(())
}
