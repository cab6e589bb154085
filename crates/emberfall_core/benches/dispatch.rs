//! Command dispatch throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use emberfall_core::command::{CommandPayload, PlayerCommand};
use emberfall_core::dispatch::CommandQueue;
use emberfall_core::game::{Game, MapCoords, WarePriority};

fn setup_game(buildings: u32) -> (Game, Vec<u32>) {
    let mut game = Game::new();
    game.add_player(1, "bench");
    let serials = (0..buildings)
        .map(|i| {
            let x = (i % 64) as u16;
            let y = (i / 64) as u16;
            game.place_building(1, MapCoords::new(x, y), 1)
        })
        .collect();
    (game, serials)
}

fn bench_dispatch_priority_commands(c: &mut Criterion) {
    c.bench_function("dispatch_10k_priority_commands", |b| {
        b.iter(|| {
            let (mut game, serials) = setup_game(64);
            let mut queue = CommandQueue::new();
            for i in 0u32..10_000 {
                let serial = serials[(i % 64) as usize];
                queue.sequence(PlayerCommand::new(
                    1,
                    u64::from(i / 100),
                    CommandPayload::SetWarePriority {
                        object: serial,
                        ware: (i % 8) as u16,
                        priority: WarePriority::High,
                        is_constructionsite_setting: false,
                    },
                ));
            }
            queue.advance(&mut game, 200);
            black_box(game.state_hash())
        });
    });
}

fn bench_state_hash(c: &mut Criterion) {
    let (game, _) = setup_game(512);
    c.bench_function("state_hash_512_buildings", |b| {
        b.iter(|| black_box(game.state_hash()));
    });
}

criterion_group!(benches, bench_dispatch_priority_commands, bench_state_hash);
criterion_main!(benches);
