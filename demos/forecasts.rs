use chrono::{TimeZone, Utc};
use pvforecast::api::forecast::PvForecast;
use pvforecast::api::EntitySelector;
use pvforecast::PvForecastApi;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let api = PvForecastApi::from_default_sources(None, None)?.with_retries(3);
    let pvf = PvForecast::new(&api);
    let national = EntitySelector::national();

    let base = Utc.with_ymd_and_hms(2022, 7, 19, 7, 0, 0).unwrap();
    println!("National forecast with forecast base {}:", base);
    println!("{}", pvf.get_forecast(Some(base), &national, &[])?.as_polars_df()?);

    let start = Utc.with_ymd_and_hms(2022, 7, 19, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2022, 7, 21, 23, 0, 0).unwrap();
    println!("National 07:00 forecasts between {} and {}:", start, end);
    let forecasts = pvf.get_forecasts(start, end, &["07:00"], &national, &[])?;
    println!("{} forecast bases", forecasts.forecast_bases().len());
    println!("{}", forecasts.as_polars_df()?);
    Ok(())
}
