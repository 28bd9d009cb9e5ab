//! Interactive terminal menus: main menu, settings and the audio output
//! setup wizard.
//!
//! Menus only collect choices and hand them to the config and controller.
//! Ctrl+C inside a mode returns here, Ctrl+C at a prompt exits, and end of
//! input leaves the menu.

use std::io::Write;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigStore, SessionConfig};
use crate::controller::{OperatingMode, TurnController};
use crate::devices::{self, AudioDevice};
use crate::error::{Error, Result};
use crate::synthesis::PlaybackMode;

const RULE: &str = "==================================================";
const TEST_PHRASE: &str = "Olá! Eu sou a Mirai. Este é um teste de voz.";

/// What a Ctrl+C does at the moment it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// A mode is running: stop it and go back to the menu.
    CancelMode,
    /// Nothing is running: leave the program.
    Exit,
}

/// Process-wide Ctrl+C handling.
///
/// Once tokio listens for SIGINT the default handler is gone for good, so
/// a single watcher decides: cancel the running mode if there is one,
/// otherwise exit.
#[derive(Clone, Default)]
pub struct InterruptWatcher {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl InterruptWatcher {
    /// Start watching for Ctrl+C. Call once per process.
    pub fn install() -> Self {
        let watcher = Self::default();
        let handler = watcher.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if handler.interrupt() == Interrupt::Exit {
                    info!("Interrupt received, exiting");
                    println!("\n👋 Até logo!");
                    std::process::exit(130);
                }
                info!("Interrupt received, stopping mode");
            }
        });
        watcher
    }

    /// A fresh token for a mode about to start. The next Ctrl+C cancels it.
    pub fn guard(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut active) = self.active.lock() {
            *active = Some(token.clone());
        }
        token
    }

    /// The mode is over; Ctrl+C exits again.
    pub fn release(&self) {
        if let Ok(mut active) = self.active.lock() {
            *active = None;
        }
    }

    fn interrupt(&self) -> Interrupt {
        let active = self.active.lock().ok().and_then(|mut active| active.take());
        match active {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                Interrupt::CancelMode
            }
            _ => Interrupt::Exit,
        }
    }
}

pub struct Menu {
    controller: TurnController,
    config: SessionConfig,
    store: ConfigStore,
    interrupts: InterruptWatcher,
    input: BufReader<Stdin>,
}

impl Menu {
    pub fn new(
        controller: TurnController,
        config: SessionConfig,
        store: ConfigStore,
        interrupts: InterruptWatcher,
    ) -> Self {
        Self {
            controller,
            config,
            store,
            interrupts,
            input: BufReader::new(tokio::io::stdin()),
        }
    }

    /// Print `text` and read one trimmed line. `None` at end of input.
    async fn prompt(&mut self, text: &str) -> Result<Option<String>> {
        print!("{text}");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    async fn confirm(&mut self, text: &str) -> Result<bool> {
        let answer = self.prompt(text).await?.unwrap_or_default();
        Ok(answer.eq_ignore_ascii_case("s"))
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("🔊 Verificando sistema de áudio...");
        if devices::output_devices().is_empty() {
            println!("❌ Nenhum dispositivo de áudio encontrado!");
            println!("💡 Verifique se seus alto-falantes/fones estão conectados.");
        }

        loop {
            print_main_menu();
            let Some(choice) = self.prompt("\nEscolha uma opção: ").await? else {
                break;
            };

            match choice.as_str() {
                "1" => self.run_mode(OperatingMode::WakeWordListening).await,
                "2" => self.settings_menu().await?,
                "3" => self.audio_setup_wizard().await?,
                "4" => {
                    self.test_tone(self.config.synthesis_device).await;
                    let _ = self.prompt("\nPressione Enter para continuar...").await?;
                }
                "5" => self.run_mode(OperatingMode::ContinuousListening).await,
                "6" => self.run_mode(OperatingMode::TextOnly).await,
                "7" => {
                    self.controller.responder_mut().reset();
                    println!("🔄 Conversa reiniciada");
                }
                "8" => break,
                _ => println!("❌ Opção inválida"),
            }
        }

        println!("👋 Até logo!");
        Ok(())
    }

    /// Run a mode until Ctrl+C (or exit words, for text).
    pub async fn run_mode(&mut self, mode: OperatingMode) {
        match mode {
            OperatingMode::WakeWordListening => {
                println!("\n🎧 Modo de escuta ativado");
                println!("🎯 Diga 'Mirai' seguido do seu comando");
            }
            OperatingMode::ContinuousListening => {
                println!("\n💬 Modo conversação direta");
                println!("⚠️  Não precisa dizer 'Mirai' antes");
            }
            _ => {}
        }
        if mode != OperatingMode::TextOnly {
            println!("⏸️  Pressione Ctrl+C para voltar ao menu\n");
        }

        let token = self.interrupts.guard();
        let result = if mode == OperatingMode::TextOnly {
            self.controller
                .run_text_only(&mut self.input, &token)
                .await
        } else {
            self.controller.run(mode, &token).await
        };
        self.interrupts.release();

        if let Err(e) = result {
            warn!("{} mode ended: {e}", mode.as_str());
            println!("❌ {e}");
        }
        println!("\n↩️  Voltando ao menu...");
    }

    async fn test_tone(&self, device: Option<usize>) {
        println!("\n🔊 Testando áudio...");
        let result = tokio::task::spawn_blocking(move || devices::play_test_tone(device))
            .await
            .map_err(|e| Error::Audio(format!("test tone task failed: {e}")))
            .and_then(|r| r);
        if let Err(e) = result {
            warn!("Test tone failed: {e}");
            println!("❌ {e}");
        }
    }

    async fn settings_menu(&mut self) -> Result<()> {
        loop {
            print_settings_menu();
            let Some(choice) = self.prompt("\nEscolha uma opção: ").await? else {
                return Ok(());
            };

            match choice.as_str() {
                "1" => {
                    let outputs = devices::output_devices();
                    if let Some(device) = self.choose_device("Saída", &outputs).await? {
                        self.config.synthesis_device = device;
                    }
                }
                "2" => {
                    let inputs = devices::input_devices();
                    if let Some(device) = self.choose_device("Entrada", &inputs).await? {
                        self.config.capture_device = device;
                    }
                }
                "3" => self.adjust_voice().await?,
                "4" => {
                    let text = self.prompt("Texto para teste: ").await?.unwrap_or_default();
                    let text = if text.is_empty() { TEST_PHRASE } else { text.as_str() };
                    if let Err(e) = self.controller.speak(text, PlaybackMode::Detached).await {
                        println!("❌ {e}");
                    }
                }
                "5" => {
                    print!("{}", devices::format_device_list("Saída", &devices::output_devices()));
                    print!("{}", devices::format_device_list("Entrada", &devices::input_devices()));
                    let _ = self.prompt("\nPressione Enter para continuar...").await?;
                }
                "6" => self.configure_wake_words().await?,
                "7" => {
                    let current = self.config.temperature;
                    let answer = self
                        .prompt(&format!("Temperatura (0.0-2.0) [{current}]: "))
                        .await?
                        .unwrap_or_default();
                    match parse_or(&answer, current) {
                        Some(temperature) => self.config.set_temperature(temperature),
                        None => println!("❌ Valor inválido"),
                    }
                }
                "8" => {
                    let answer = self
                        .prompt(&format!("Modelo Ollama [{}]: ", self.config.model))
                        .await?
                        .unwrap_or_default();
                    if !answer.is_empty() {
                        self.config.model = answer;
                    }
                }
                "9" => match self.store.save(&self.config) {
                    Ok(()) => println!("✅ Configuração salva em {}", self.store.path().display()),
                    Err(e) => println!("❌ Erro ao salvar configuração: {e}"),
                },
                "0" => return Ok(()),
                _ => println!("❌ Opção inválida"),
            }

            self.controller.apply_config(&self.config);
        }
    }

    /// Let the user pick a device. `Some(None)` means system default,
    /// `None` means nothing changed.
    async fn choose_device(
        &mut self,
        title: &str,
        devices: &[AudioDevice],
    ) -> Result<Option<Option<usize>>> {
        print!("{}", devices::format_device_list(title, devices));
        let answer = self
            .prompt("Número do dispositivo (Enter = padrão): ")
            .await?
            .unwrap_or_default();

        if answer.is_empty() {
            println!("✅ Usando o dispositivo padrão");
            return Ok(Some(None));
        }
        match answer.parse::<usize>() {
            Ok(index) if devices.iter().any(|d| d.index == index) => {
                println!("✅ Dispositivo {index} selecionado");
                Ok(Some(Some(index)))
            }
            _ => {
                println!("❌ Dispositivo inválido");
                Ok(None)
            }
        }
    }

    async fn adjust_voice(&mut self) -> Result<()> {
        let volume = self.prompt("Volume (0.0-2.0): ").await?.unwrap_or_default();
        let rate = self.prompt("Velocidade (0.5-2.0): ").await?.unwrap_or_default();

        match (parse_or(&volume, 1.0), parse_or(&rate, 1.1)) {
            (Some(volume), Some(rate)) => {
                self.config.set_voice_settings(volume, rate);
                println!(
                    "✅ Volume {:.1}, velocidade {:.1}",
                    self.config.volume, self.config.rate
                );
            }
            _ => println!("❌ Valores inválidos"),
        }
        Ok(())
    }

    async fn configure_wake_words(&mut self) -> Result<()> {
        println!("\n🔧 Configurar palavras de ativação");
        println!("Palavras atuais: {}", self.config.wake_words.join(", "));
        let answer = self
            .prompt("Novas palavras (separadas por vírgula): ")
            .await?
            .unwrap_or_default();

        if answer.is_empty() {
            return Ok(());
        }
        if self.config.set_wake_words_csv(&answer) {
            println!("✅ Palavras atualizadas: {}", self.config.wake_words.join(", "));
        } else {
            println!("❌ Nenhuma palavra válida");
        }
        Ok(())
    }

    /// Play the tone on the default output, then on each other device
    /// until the user hears one. The confirmed device is saved.
    async fn audio_setup_wizard(&mut self) -> Result<()> {
        println!("\n{RULE}");
        println!("🎧 ASSISTENTE DE SAÍDA DE SOM");
        println!("{RULE}");
        println!("Vamos configurar onde a Mirai vai falar...");

        let outputs = devices::output_devices();
        print!("{}", devices::format_device_list("Saída", &outputs));

        println!("\n🔊 Primeiro o dispositivo padrão");
        self.test_tone(None).await;
        if self.confirm("\n🎧 Você ouviu o som? (S/N): ").await? {
            println!("Dispositivo padrão funcionando, não precisa configurar");
            return Ok(());
        }

        println!("\n🔍 Vamos tentar outros dispositivos...");
        for device in outputs.iter().filter(|d| !d.is_default) {
            println!("\nTestando: {} (ID: {})", device.name, device.index);
            self.test_tone(Some(device.index)).await;

            if self.confirm("Você ouviu o som deste dispositivo? (S/N): ").await? {
                self.config.synthesis_device = Some(device.index);
                self.controller.apply_config(&self.config);
                match self.store.save(&self.config) {
                    Ok(()) => println!("✅ Dispositivo selecionado e salvo!"),
                    Err(e) => println!("❌ Erro ao salvar configuração: {e}"),
                }
                return Ok(());
            }
        }

        println!("❌ Nenhum dispositivo confirmado");
        Ok(())
    }
}

fn print_main_menu() {
    println!("\n{RULE}");
    println!("🤖 M.I.R.A.I - MENU PRINCIPAL");
    println!("{RULE}");
    println!("1. Iniciar modo de escuta (com wake word)");
    println!("2. Configurações");
    println!("3. Configurações de saída de som");
    println!("4. Teste rápido de áudio");
    println!("5. Conversação direta (sem wake word)");
    println!("6. Conversa por texto");
    println!("7. Reiniciar conversa");
    println!("8. Sair");
    println!("{RULE}");
}

fn print_settings_menu() {
    println!("\n{RULE}");
    println!("⚙️  CONFIGURAÇÕES DA MIRAI");
    println!("{RULE}");
    println!("1. Dispositivo de saída de áudio");
    println!("2. Dispositivo de entrada (microfone)");
    println!("3. Ajustar volume e velocidade");
    println!("4. Testar síntese de voz");
    println!("5. Listar dispositivos de áudio");
    println!("6. Configurar palavras de ativação");
    println!("7. Temperatura do modelo");
    println!("8. Modelo de linguagem");
    println!("9. Salvar configuração");
    println!("0. Voltar ao menu principal");
    println!("{RULE}");
}

/// Parse a number, with `default` for an empty answer. Accepts a decimal
/// comma.
fn parse_or(answer: &str, default: f32) -> Option<f32> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Some(default);
    }
    answer.replace(',', ".").parse::<f32>().ok().filter(|v| v.is_finite())
}
